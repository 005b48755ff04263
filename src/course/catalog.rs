use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use sqlx::SqlitePool;
use tracing::info;

use super::tree::{CourseModule, CourseTree, Lesson};
use crate::error::{Error, Result};

#[derive(Debug, sqlx::FromRow)]
struct CourseRow {
    id: String,
    title: String,
    description: Option<String>,
    knowledge_base: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ModuleRow {
    id: String,
    ord: i64,
    title: String,
}

#[derive(Debug, sqlx::FromRow)]
struct LessonRow {
    module_id: String,
    id: String,
    ord: i64,
    title: String,
    unlock_code: String,
    knowledge_base: Option<String>,
    welcome_message: Option<String>,
}

/// Read-only view over the course content store. Whole course subtrees are
/// loaded in one go and cached; `invalidate` drops the cached tree after a
/// content change.
#[derive(Debug, Clone)]
pub struct CourseCatalog {
    courses: Arc<DashMap<String, Arc<CourseTree>>>,
    database: SqlitePool,
}

impl CourseCatalog {
    pub fn new(database: SqlitePool) -> Self {
        Self {
            courses: Arc::new(DashMap::new()),
            database,
        }
    }

    pub async fn get_course(&self, course_id: &str) -> Result<Arc<CourseTree>> {
        if let Some(course) = self.courses.get(course_id) {
            return Ok(course.clone());
        }
        let course = Arc::new(self.load_course(course_id).await?);
        self.courses.insert(course_id.to_string(), course.clone());
        Ok(course)
    }

    pub fn invalidate(&self, course_id: &str) {
        self.courses.remove(course_id);
    }

    async fn load_course(&self, course_id: &str) -> Result<CourseTree> {
        let row = sqlx::query_as::<_, CourseRow>(
            "select id, title, description, knowledge_base from course where id = ?",
        )
        .bind(course_id)
        .fetch_optional(&self.database)
        .await?
        .ok_or_else(|| Error::CourseNotFound(course_id.to_string()))?;

        let module_rows = sqlx::query_as::<_, ModuleRow>(
            "select id, ord, title from course_module where course_id = ?",
        )
        .bind(course_id)
        .fetch_all(&self.database)
        .await?;
        let lesson_rows = sqlx::query_as::<_, LessonRow>(
            "select module_id, id, ord, title, unlock_code, knowledge_base, welcome_message \
             from lesson where course_id = ?",
        )
        .bind(course_id)
        .fetch_all(&self.database)
        .await?;

        let mut modules: HashMap<String, CourseModule> = module_rows
            .into_iter()
            .map(|m| {
                (
                    m.id.clone(),
                    CourseModule {
                        id: m.id,
                        order: m.ord,
                        title: m.title,
                        lessons: HashMap::new(),
                    },
                )
            })
            .collect();
        for l in lesson_rows {
            let Some(module) = modules.get_mut(&l.module_id) else {
                // orphan row, content store edited by hand; skip it
                continue;
            };
            module.lessons.insert(
                l.id.clone(),
                Lesson {
                    id: l.id,
                    order: l.ord,
                    title: l.title,
                    unlock_code: l.unlock_code,
                    knowledge_base: l.knowledge_base,
                    welcome_message: l.welcome_message,
                },
            );
        }

        Ok(CourseTree {
            id: row.id,
            title: row.title,
            description: row.description,
            knowledge_base: row.knowledge_base,
            modules,
        })
    }

    pub async fn get_ordered_modules(&self, course_id: &str) -> Result<Vec<CourseModule>> {
        let course = self.get_course(course_id).await?;
        Ok(course.ordered_modules().into_iter().cloned().collect())
    }

    pub async fn get_ordered_lessons(
        &self,
        course_id: &str,
        module_id: &str,
    ) -> Result<Vec<Lesson>> {
        let course = self.get_course(course_id).await?;
        let module = course
            .modules
            .get(module_id)
            .ok_or_else(|| Error::ModuleNotFound(module_id.to_string()))?;
        Ok(module.ordered_lessons().into_iter().cloned().collect())
    }

    /// Resolve a lesson to its owning module id and the lesson itself.
    pub async fn find_lesson(&self, course_id: &str, lesson_id: &str) -> Result<(String, Lesson)> {
        let course = self.get_course(course_id).await?;
        let (module, lesson) = course
            .find_lesson(lesson_id)
            .ok_or_else(|| Error::LessonNotFound(lesson_id.to_string()))?;
        Ok((module.id.clone(), lesson.clone()))
    }

    pub async fn get_knowledge_base(
        &self,
        course_id: &str,
        lesson_id: Option<&str>,
    ) -> Result<Option<String>> {
        let course = self.get_course(course_id).await?;
        Ok(course.knowledge_base_for(lesson_id).map(str::to_string))
    }

    /// Write a whole course subtree into the content store, replacing any
    /// previous content for the same course id.
    pub async fn import_course(&self, tree: &CourseTree) -> Result<()> {
        let mut tx = self.database.begin().await?;
        // upsert the course row; a delete would cascade into enrollments
        sqlx::query(
            "insert into course (id, title, description, knowledge_base) values (?, ?, ?, ?) \
             on conflict (id) do update set title = excluded.title, \
             description = excluded.description, knowledge_base = excluded.knowledge_base",
        )
        .bind(&tree.id)
        .bind(&tree.title)
        .bind(&tree.description)
        .bind(&tree.knowledge_base)
        .execute(&mut *tx)
        .await?;
        sqlx::query("delete from lesson where course_id = ?")
            .bind(&tree.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("delete from course_module where course_id = ?")
            .bind(&tree.id)
            .execute(&mut *tx)
            .await?;
        for module in tree.modules.values() {
            sqlx::query(
                "insert into course_module (course_id, id, ord, title) values (?, ?, ?, ?)",
            )
            .bind(&tree.id)
            .bind(&module.id)
            .bind(module.order)
            .bind(&module.title)
            .execute(&mut *tx)
            .await?;
            for lesson in module.lessons.values() {
                sqlx::query(
                    "insert into lesson (course_id, module_id, id, ord, title, unlock_code, \
                     knowledge_base, welcome_message) values (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&tree.id)
                .bind(&module.id)
                .bind(&lesson.id)
                .bind(lesson.order)
                .bind(&lesson.title)
                .bind(&lesson.unlock_code)
                .bind(&lesson.knowledge_base)
                .bind(&lesson.welcome_message)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        self.invalidate(&tree.id);
        info!("imported course {} ({} modules)", tree.id, tree.modules.len());
        Ok(())
    }

    pub async fn list_courses(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, (String, String)>("select id, title from course order by id")
            .fetch_all(&self.database)
            .await?;
        Ok(rows)
    }
}
