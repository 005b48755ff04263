use std::collections::HashMap;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

use crate::course::tree::{CourseModule, CourseTree, Lesson};

/// Single-connection in-memory database with the schema applied. One
/// connection, because every new sqlite `:memory:` connection is a fresh
/// empty database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::MIGRATOR.run(&pool).await.unwrap();
    pool
}

fn lesson(id: &str, order: i64, unlock_code: &str) -> Lesson {
    Lesson {
        id: id.to_string(),
        order,
        title: format!("Lesson {id}"),
        unlock_code: unlock_code.to_string(),
        knowledge_base: None,
        welcome_message: None,
    }
}

/// Course "c1": module "m1" with lessons "l1" (code "ABC") and
/// "l2" (code "DEF").
pub fn sample_course() -> CourseTree {
    let mut lessons = HashMap::new();
    lessons.insert("l1".to_string(), lesson("l1", 1, "ABC"));
    lessons.insert("l2".to_string(), lesson("l2", 2, "DEF"));
    let mut modules = HashMap::new();
    modules.insert(
        "m1".to_string(),
        CourseModule {
            id: "m1".to_string(),
            order: 1,
            title: "Module 1".to_string(),
            lessons,
        },
    );
    CourseTree {
        id: "c1".to_string(),
        title: "Course 1".to_string(),
        description: None,
        knowledge_base: None,
        modules,
    }
}

/// Course "c2": two modules of two lessons each, every lesson with unlock
/// code `CODE_<id>`.
pub fn two_module_course() -> CourseTree {
    let mut m1_lessons = HashMap::new();
    m1_lessons.insert("l1".to_string(), lesson("l1", 1, "CODE_l1"));
    m1_lessons.insert("l2".to_string(), lesson("l2", 2, "CODE_l2"));
    let mut m2_lessons = HashMap::new();
    m2_lessons.insert("l3".to_string(), lesson("l3", 1, "CODE_l3"));
    m2_lessons.insert("l4".to_string(), lesson("l4", 2, "CODE_l4"));
    let mut modules = HashMap::new();
    modules.insert(
        "m1".to_string(),
        CourseModule {
            id: "m1".to_string(),
            order: 1,
            title: "Module 1".to_string(),
            lessons: m1_lessons,
        },
    );
    modules.insert(
        "m2".to_string(),
        CourseModule {
            id: "m2".to_string(),
            order: 2,
            title: "Module 2".to_string(),
            lessons: m2_lessons,
        },
    );
    CourseTree {
        id: "c2".to_string(),
        title: "Course 2".to_string(),
        description: None,
        knowledge_base: None,
        modules,
    }
}
