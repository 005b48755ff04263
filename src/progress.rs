use std::{collections::BTreeSet, sync::Arc};

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    course::{catalog::CourseCatalog, tree::CourseTree},
    error::{Error, Result},
    utils::now_local,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    InProgress,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::InProgress => "in_progress",
            EnrollmentStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(EnrollmentStatus::InProgress),
            "completed" => Ok(EnrollmentStatus::Completed),
            other => Err(anyhow::anyhow!("unknown enrollment status: {other}")),
        }
    }
}

/// One student's position in one course. Mutated only through
/// [`ProgressTracker`]; invariant: `current_lesson_id` is always a member
/// of `unlocked_lessons`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentProgress {
    pub student_id: String,
    pub course_id: String,
    pub current_lesson_id: String,
    pub unlocked_lessons: BTreeSet<String>,
    pub completed_lessons: BTreeSet<String>,
    pub status: EnrollmentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub update_time: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Unlocked { next_lesson_id: String },
    CourseCompleted,
}

impl EnrollmentProgress {
    /// The advance step on an in-memory enrollment. All checks happen
    /// before the first mutation, so a rejection leaves `self` untouched.
    pub fn advance(
        &mut self,
        tree: &CourseTree,
        current_lesson_id: &str,
        supplied_unlock_code: &str,
    ) -> Result<AdvanceOutcome> {
        let (_, lesson) = tree
            .find_lesson(current_lesson_id)
            .ok_or_else(|| Error::LessonNotFound(current_lesson_id.to_string()))?;
        if lesson.unlock_code != supplied_unlock_code {
            return Err(Error::IncorrectUnlockCode(current_lesson_id.to_string()));
        }
        if !self.unlocked_lessons.contains(current_lesson_id) {
            return Err(Error::LessonLocked(current_lesson_id.to_string()));
        }

        let outcome = match tree.next_lesson_after(current_lesson_id) {
            Some(next) => {
                self.completed_lessons.insert(current_lesson_id.to_string());
                self.unlocked_lessons.insert(next.id.clone());
                self.current_lesson_id = next.id.clone();
                AdvanceOutcome::Unlocked {
                    next_lesson_id: next.id.clone(),
                }
            }
            None => {
                self.completed_lessons.insert(current_lesson_id.to_string());
                self.status = EnrollmentStatus::Completed;
                AdvanceOutcome::CourseCompleted
            }
        };
        self.update_time = now_local();
        Ok(outcome)
    }
}

/// Outcome of a persisted advance, with the post-state snapshot for the
/// caller to surface.
#[derive(Debug, Clone)]
pub struct AdvanceReceipt {
    pub outcome: AdvanceOutcome,
    pub enrollment: EnrollmentProgress,
}

#[derive(Debug, sqlx::FromRow)]
struct EnrollmentRow {
    student_id: String,
    course_id: String,
    current_lesson_id: String,
    unlocked_lessons: String,
    completed_lessons: String,
    status: String,
    update_time: OffsetDateTime,
}

impl EnrollmentRow {
    fn into_progress(self) -> anyhow::Result<EnrollmentProgress> {
        Ok(EnrollmentProgress {
            student_id: self.student_id,
            course_id: self.course_id,
            current_lesson_id: self.current_lesson_id,
            unlocked_lessons: serde_json::from_str(&self.unlocked_lessons)?,
            completed_lessons: serde_json::from_str(&self.completed_lessons)?,
            status: self.status.parse()?,
            update_time: self.update_time,
        })
    }
}

/// Sole writer of enrollment progress. Advances are serialized per
/// (student, course) key so concurrent unlock-triggering turns cannot race
/// past each other.
#[derive(Clone)]
pub struct ProgressTracker {
    catalog: CourseCatalog,
    database: SqlitePool,
    locks: Cache<(String, String), Arc<Mutex<()>>>,
}

impl ProgressTracker {
    pub fn new(catalog: CourseCatalog, database: SqlitePool) -> Self {
        Self {
            catalog,
            database,
            locks: Cache::new(10_000),
        }
    }

    /// Create the enrollment record with the first lesson of the flattened
    /// sequence unlocked and current.
    pub async fn enroll(&self, student_id: &str, course_id: &str) -> Result<EnrollmentProgress> {
        let tree = self.catalog.get_course(course_id).await?;
        let first = tree.first_lesson().ok_or_else(|| {
            Error::InvalidArgument(format!("course {course_id} has no lessons to enroll into"))
        })?;
        let enrollment = EnrollmentProgress {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
            current_lesson_id: first.id.clone(),
            unlocked_lessons: BTreeSet::from([first.id.clone()]),
            completed_lessons: BTreeSet::new(),
            status: EnrollmentStatus::InProgress,
            update_time: now_local(),
        };
        self.save_enrollment(&enrollment).await?;
        info!(
            "enrolled student {} in course {}, starting at {}",
            student_id, course_id, first.id
        );
        Ok(enrollment)
    }

    /// Advance a student through the course after a successful lesson
    /// completion. Rejections leave the stored enrollment untouched.
    pub async fn advance(
        &self,
        student_id: &str,
        course_id: &str,
        current_lesson_id: &str,
        supplied_unlock_code: &str,
    ) -> Result<AdvanceReceipt> {
        let key = (student_id.to_string(), course_id.to_string());
        let lock = self
            .locks
            .get_with(key, async { Arc::new(Mutex::new(())) })
            .await;
        let _guard = lock.lock().await;

        let tree = self.catalog.get_course(course_id).await?;
        let mut enrollment = self.load_enrollment(student_id, course_id).await?;
        let outcome = enrollment.advance(&tree, current_lesson_id, supplied_unlock_code)?;
        self.save_enrollment(&enrollment).await?;

        match &outcome {
            AdvanceOutcome::Unlocked { next_lesson_id } => {
                info!(
                    "student {} unlocked lesson {} in course {}",
                    student_id, next_lesson_id, course_id
                );
            }
            AdvanceOutcome::CourseCompleted => {
                info!("student {} completed course {}", student_id, course_id);
            }
        }
        Ok(AdvanceReceipt {
            outcome,
            enrollment,
        })
    }

    pub async fn load_enrollment(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<EnrollmentProgress> {
        let row = sqlx::query_as::<_, EnrollmentRow>(
            "select student_id, course_id, current_lesson_id, unlocked_lessons, \
             completed_lessons, status, update_time from enrollment \
             where student_id = ? and course_id = ?",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.database)
        .await?
        .ok_or_else(|| Error::EnrollmentNotFound {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
        })?;
        Ok(row.into_progress()?)
    }

    async fn save_enrollment(&self, enrollment: &EnrollmentProgress) -> Result<()> {
        let unlocked = serde_json::to_string(&enrollment.unlocked_lessons)
            .map_err(anyhow::Error::from)?;
        let completed = serde_json::to_string(&enrollment.completed_lessons)
            .map_err(anyhow::Error::from)?;
        sqlx::query(
            "replace into enrollment (student_id, course_id, current_lesson_id, \
             unlocked_lessons, completed_lessons, status, update_time) \
             values (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&enrollment.student_id)
        .bind(&enrollment.course_id)
        .bind(&enrollment.current_lesson_id)
        .bind(unlocked)
        .bind(completed)
        .bind(enrollment.status.as_str())
        .bind(enrollment.update_time)
        .execute(&self.database)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_pool, sample_course, two_module_course};

    async fn tracker_with(tree: &CourseTree) -> ProgressTracker {
        let database = memory_pool().await;
        let catalog = CourseCatalog::new(database.clone());
        catalog.import_course(tree).await.unwrap();
        ProgressTracker::new(catalog, database)
    }

    #[tokio::test]
    async fn advance_unlocks_the_next_lesson() {
        let tracker = tracker_with(&sample_course()).await;
        tracker.enroll("s1", "c1").await.unwrap();

        let receipt = tracker.advance("s1", "c1", "l1", "ABC").await.unwrap();
        assert_eq!(
            receipt.outcome,
            AdvanceOutcome::Unlocked {
                next_lesson_id: "l2".to_string()
            }
        );
        let e = &receipt.enrollment;
        assert_eq!(e.current_lesson_id, "l2");
        assert!(e.unlocked_lessons.contains("l1") && e.unlocked_lessons.contains("l2"));
        assert_eq!(e.completed_lessons, BTreeSet::from(["l1".to_string()]));
        assert_eq!(e.status, EnrollmentStatus::InProgress);

        // persisted state matches the receipt
        let stored = tracker.load_enrollment("s1", "c1").await.unwrap();
        assert_eq!(stored.current_lesson_id, "l2");
        assert!(stored.unlocked_lessons.contains(&stored.current_lesson_id));
    }

    #[tokio::test]
    async fn wrong_code_rejects_without_mutation() {
        let tracker = tracker_with(&sample_course()).await;
        tracker.enroll("s1", "c1").await.unwrap();

        let err = tracker.advance("s1", "c1", "l1", "WRONG").await.unwrap_err();
        assert!(matches!(err, Error::IncorrectUnlockCode(_)));

        let stored = tracker.load_enrollment("s1", "c1").await.unwrap();
        assert_eq!(stored.current_lesson_id, "l1");
        assert_eq!(stored.unlocked_lessons, BTreeSet::from(["l1".to_string()]));
        assert!(stored.completed_lessons.is_empty());
    }

    #[tokio::test]
    async fn last_lesson_completes_the_course() {
        let tracker = tracker_with(&sample_course()).await;
        tracker.enroll("s1", "c1").await.unwrap();
        tracker.advance("s1", "c1", "l1", "ABC").await.unwrap();

        let receipt = tracker.advance("s1", "c1", "l2", "DEF").await.unwrap();
        assert_eq!(receipt.outcome, AdvanceOutcome::CourseCompleted);
        assert_eq!(receipt.enrollment.status, EnrollmentStatus::Completed);
        assert!(receipt.enrollment.completed_lessons.contains("l2"));
    }

    #[tokio::test]
    async fn walks_the_whole_flattened_sequence_in_order() {
        let tree = two_module_course();
        let tracker = tracker_with(&tree).await;
        tracker.enroll("s1", "c2").await.unwrap();

        let flattened: Vec<String> = tree
            .flattened_lessons()
            .iter()
            .map(|l| l.id.clone())
            .collect();
        let mut unlocked_so_far = 1;
        for (k, lesson_id) in flattened.iter().enumerate() {
            let code = format!("CODE_{lesson_id}");
            let receipt = tracker.advance("s1", "c2", lesson_id, &code).await.unwrap();
            // unlocked set never shrinks, current stays a member of it
            assert!(receipt.enrollment.unlocked_lessons.len() >= unlocked_so_far);
            unlocked_so_far = receipt.enrollment.unlocked_lessons.len();
            assert!(receipt
                .enrollment
                .unlocked_lessons
                .contains(&receipt.enrollment.current_lesson_id));
            if k + 1 < flattened.len() {
                assert_eq!(
                    receipt.outcome,
                    AdvanceOutcome::Unlocked {
                        next_lesson_id: flattened[k + 1].clone()
                    }
                );
            } else {
                assert_eq!(receipt.outcome, AdvanceOutcome::CourseCompleted);
            }
        }
    }

    #[tokio::test]
    async fn locked_lesson_is_rejected_with_typed_error() {
        let tracker = tracker_with(&two_module_course()).await;
        tracker.enroll("s1", "c2").await.unwrap();

        // lesson exists and the code is right, but it was never unlocked
        let err = tracker
            .advance("s1", "c2", "l3", "CODE_l3")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LessonLocked(_)));
    }

    #[tokio::test]
    async fn unknown_lesson_and_missing_enrollment() {
        let tracker = tracker_with(&sample_course()).await;
        tracker.enroll("s1", "c1").await.unwrap();

        assert!(matches!(
            tracker.advance("s1", "c1", "ghost", "ABC").await.unwrap_err(),
            Error::LessonNotFound(_)
        ));
        assert!(matches!(
            tracker.advance("nobody", "c1", "l1", "ABC").await.unwrap_err(),
            Error::EnrollmentNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn enroll_rejects_an_empty_course() {
        let tree = CourseTree {
            id: "empty".to_string(),
            title: "Empty".to_string(),
            description: None,
            knowledge_base: None,
            modules: Default::default(),
        };
        let tracker = tracker_with(&tree).await;
        assert!(matches!(
            tracker.enroll("s1", "empty").await.unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }
}
