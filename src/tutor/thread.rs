use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;

use crate::utils::now_local;

/// The two conversation contexts a student can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    CourseQa,
    LessonRecitation,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::CourseQa => "course_qa",
            ChatType::LessonRecitation => "lesson_recitation",
        }
    }
}

impl std::str::FromStr for ChatType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course_qa" => Ok(ChatType::CourseQa),
            "lesson_recitation" => Ok(ChatType::LessonRecitation),
            other => Err(anyhow::anyhow!("unknown chat type: {other}")),
        }
    }
}

/// Combination key owning one backend thread. `lesson_id` is `None` for
/// course-level Q&A.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub student_id: String,
    pub course_id: String,
    pub lesson_id: Option<String>,
    pub chat_type: ChatType,
}

impl ThreadKey {
    fn lesson_column(&self) -> &str {
        self.lesson_id.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub key: ThreadKey,
    pub thread_id: String,
    pub created_at: OffsetDateTime,
}

/// Persistence for thread-handle mappings. Records have no automatic
/// expiry; `prune_older_than` is the explicit retention operation.
#[derive(Debug, Clone)]
pub struct ThreadStore {
    database: SqlitePool,
}

impl ThreadStore {
    pub fn new(database: SqlitePool) -> Self {
        Self { database }
    }

    pub async fn find(&self, key: &ThreadKey) -> anyhow::Result<Option<ThreadRecord>> {
        let row = sqlx::query_as::<_, (String, OffsetDateTime)>(
            "select thread_id, created_at from tutoring_thread \
             where student_id = ? and course_id = ? and lesson_id = ? and chat_type = ?",
        )
        .bind(&key.student_id)
        .bind(&key.course_id)
        .bind(key.lesson_column())
        .bind(key.chat_type.as_str())
        .fetch_optional(&self.database)
        .await?;
        Ok(row.map(|(thread_id, created_at)| ThreadRecord {
            key: key.clone(),
            thread_id,
            created_at,
        }))
    }

    pub async fn insert(&self, key: &ThreadKey, thread_id: &str) -> anyhow::Result<ThreadRecord> {
        let created_at = now_local();
        sqlx::query(
            "insert into tutoring_thread \
             (student_id, course_id, lesson_id, chat_type, thread_id, created_at) \
             values (?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.student_id)
        .bind(&key.course_id)
        .bind(key.lesson_column())
        .bind(key.chat_type.as_str())
        .bind(thread_id)
        .bind(created_at)
        .execute(&self.database)
        .await?;
        Ok(ThreadRecord {
            key: key.clone(),
            thread_id: thread_id.to_string(),
            created_at,
        })
    }

    /// Drop mappings created before the cutoff. Only the mapping goes away;
    /// the backend keeps its own data.
    pub async fn prune_older_than(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64> {
        let result = sqlx::query("delete from tutoring_thread where created_at < ?")
            .bind(cutoff)
            .execute(&self.database)
            .await?;
        let pruned = result.rows_affected();
        if pruned > 0 {
            info!("pruned {} tutoring thread mappings", pruned);
        }
        Ok(pruned)
    }
}
