use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single lesson. `id` is unique within its course; `order` drives the
/// position inside the module and is independent of map iteration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub order: i64,
    pub title: String,
    pub unlock_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseModule {
    pub id: String,
    pub order: i64,
    pub title: String,
    #[serde(default)]
    pub lessons: HashMap<String, Lesson>,
}

impl CourseModule {
    /// Lessons sorted ascending by `order`, ties broken by id so repeated
    /// traversals are stable even over degenerate content.
    pub fn ordered_lessons(&self) -> Vec<&Lesson> {
        let mut lessons: Vec<&Lesson> = self.lessons.values().collect();
        lessons.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        lessons
    }
}

/// The content tree of one course. Modules and lessons are keyed maps as in
/// the content store; every ordered view is derived on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseTree {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
    #[serde(default)]
    pub modules: HashMap<String, CourseModule>,
}

impl CourseTree {
    pub fn ordered_modules(&self) -> Vec<&CourseModule> {
        let mut modules: Vec<&CourseModule> = self.modules.values().collect();
        modules.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        modules
    }

    /// All lessons of the course in document order: modules by `order`,
    /// lessons by `order` within each module, concatenated.
    pub fn flattened_lessons(&self) -> Vec<&Lesson> {
        self.ordered_modules()
            .into_iter()
            .flat_map(|m| m.ordered_lessons())
            .collect()
    }

    pub fn find_lesson(&self, lesson_id: &str) -> Option<(&CourseModule, &Lesson)> {
        for module in self.ordered_modules() {
            if let Some(lesson) = module.lessons.get(lesson_id) {
                return Some((module, lesson));
            }
        }
        None
    }

    /// The lesson following `lesson_id` in the flattened sequence, if any.
    pub fn next_lesson_after(&self, lesson_id: &str) -> Option<&Lesson> {
        let flattened = self.flattened_lessons();
        let position = flattened.iter().position(|l| l.id == lesson_id)?;
        flattened.get(position + 1).copied()
    }

    pub fn first_lesson(&self) -> Option<&Lesson> {
        self.flattened_lessons().first().copied()
    }

    /// Knowledge base in priority order: the lesson's own template when
    /// present and non-empty, else the course-level one. Lesson id `None`
    /// (course Q&A) resolves straight to the course template.
    pub fn knowledge_base_for(&self, lesson_id: Option<&str>) -> Option<&str> {
        if let Some(lesson_id) = lesson_id {
            if let Some((_, lesson)) = self.find_lesson(lesson_id) {
                if let Some(kb) = lesson.knowledge_base.as_deref() {
                    if !kb.trim().is_empty() {
                        return Some(kb);
                    }
                }
            }
        }
        self.knowledge_base
            .as_deref()
            .filter(|kb| !kb.trim().is_empty())
    }
}
