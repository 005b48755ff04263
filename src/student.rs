use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::utils::now_local;

/// Personalization fields for one student account. Authentication lives in
/// an external service; this store only carries what the tutor templates
/// need.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudentProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub experience_level: String,
    pub industry: String,
}

pub async fn create_student(database: &SqlitePool, profile: &StudentProfile) -> anyhow::Result<()> {
    let now = now_local();
    sqlx::query(
        "insert into student (id, first_name, last_name, experience_level, industry, date_enrolled) \
         values (?, ?, ?, ?, ?, ?)",
    )
    .bind(&profile.id)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(&profile.experience_level)
    .bind(&profile.industry)
    .bind(now)
    .execute(database)
    .await?;
    Ok(())
}

pub async fn get_student_profile(
    database: &SqlitePool,
    id: &str,
) -> anyhow::Result<Option<StudentProfile>> {
    let profile = sqlx::query_as::<_, StudentProfile>(
        "select id, first_name, last_name, experience_level, industry from student where id = ?",
    )
    .bind(id)
    .fetch_optional(database)
    .await?;
    Ok(profile)
}

pub async fn get_student_list(database: &SqlitePool) -> anyhow::Result<Vec<StudentProfile>> {
    let students = sqlx::query_as::<_, StudentProfile>(
        "select id, first_name, last_name, experience_level, industry from student order by id",
    )
    .fetch_all(database)
    .await?;
    Ok(students)
}

pub async fn delete_student(database: &SqlitePool, id: &str) -> anyhow::Result<()> {
    sqlx::query("delete from enrollment where student_id = ?")
        .bind(id)
        .execute(database)
        .await?;
    sqlx::query("delete from tutoring_thread where student_id = ?")
        .bind(id)
        .execute(database)
        .await?;
    sqlx::query("delete from student where id = ?")
        .bind(id)
        .execute(database)
        .await?;
    Ok(())
}
