pub mod backend;
pub mod template;
pub mod thread;
pub mod unlock;

use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    config::TutorConfig,
    course::catalog::CourseCatalog,
    error::{Error, Result},
    progress::{AdvanceOutcome, ProgressTracker},
    student::{self, StudentProfile},
};
use backend::{AssistantBackend, Role, RunState};
use template::{TemplateContext, render, resolve_instructions};
use thread::{ChatType, ThreadKey, ThreadStore};
use unlock::extract_unlock_signal;

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub student_id: String,
    pub course_id: String,
    pub lesson_id: Option<String>,
    pub chat_type: ChatType,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub response_text: String,
    pub thread_id: String,
    pub unlock_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advance: Option<AdvanceOutcome>,
}

/// Runs tutoring turns: thread lifecycle, instruction templating, one
/// message/run exchange with bounded polling, and unlock handling. The
/// surrounding host provides concurrency; one call is one logical request.
pub struct TutorSessionManager {
    catalog: CourseCatalog,
    tracker: ProgressTracker,
    threads: ThreadStore,
    backend: Arc<dyn AssistantBackend>,
    config: TutorConfig,
    database: SqlitePool,
}

impl TutorSessionManager {
    pub fn new(
        catalog: CourseCatalog,
        tracker: ProgressTracker,
        backend: Arc<dyn AssistantBackend>,
        config: TutorConfig,
        database: SqlitePool,
    ) -> Self {
        Self {
            catalog,
            tracker,
            threads: ThreadStore::new(database.clone()),
            backend,
            config,
            database,
        }
    }

    /// One request/response exchange. On an unlock signal in a recitation
    /// reply the progress tracker is invoked; a rejected signal (wrong or
    /// stale token) downgrades to "no unlock" rather than failing the turn.
    pub async fn run_turn(&self, req: TurnRequest) -> Result<TurnResult> {
        if req.message.trim().is_empty() {
            return Err(Error::InvalidArgument("message must not be empty".to_string()));
        }
        if req.chat_type == ChatType::LessonRecitation && req.lesson_id.is_none() {
            return Err(Error::InvalidArgument(
                "lesson recitation requires a lesson id".to_string(),
            ));
        }

        let key = ThreadKey {
            student_id: req.student_id.clone(),
            course_id: req.course_id.clone(),
            lesson_id: req.lesson_id.clone(),
            chat_type: req.chat_type,
        };
        let record = match self.threads.find(&key).await? {
            Some(record) => record,
            None => {
                let handle = self.backend.create_thread(&key).await?;
                let record = self.threads.insert(&key, &handle).await?;
                info!(
                    "created {} thread {} for student {} in course {}",
                    key.chat_type.as_str(),
                    handle,
                    key.student_id,
                    key.course_id
                );
                record
            }
        };
        let thread_id = record.thread_id;

        let profile = match student::get_student_profile(&self.database, &req.student_id).await? {
            Some(profile) => profile,
            None => {
                warn!(
                    "no profile for student {}, using neutral personalization",
                    req.student_id
                );
                StudentProfile {
                    id: req.student_id.clone(),
                    ..StudentProfile::default()
                }
            }
        };
        let knowledge_base = self
            .catalog
            .get_knowledge_base(&req.course_id, req.lesson_id.as_deref())
            .await?;
        let ctx = TemplateContext {
            profile: &profile,
            course_id: &req.course_id,
            lesson_id: req.lesson_id.as_deref(),
        };
        let instructions = resolve_instructions(
            knowledge_base.as_deref(),
            self.config.global_instructions.as_deref(),
            &ctx,
        );

        self.backend.post_message(&thread_id, &req.message).await?;
        let run_id = self.backend.start_run(&thread_id, &instructions).await?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.backend.run_status(&thread_id, &run_id).await? {
                RunState::Completed => break,
                RunState::Failed { reason } => {
                    warn!("run {} failed: {}", run_id, reason);
                    return Err(Error::RunFailed(reason));
                }
                RunState::Cancelled => return Err(Error::RunFailed("run was cancelled".to_string())),
                RunState::Expired => return Err(Error::RunFailed("run expired".to_string())),
                RunState::Queued | RunState::InProgress => {
                    if attempts >= self.config.max_poll_attempts {
                        warn!("run {} still not terminal after {} checks", run_id, attempts);
                        return Err(Error::RunTimeout { attempts });
                    }
                    sleep(self.config.poll_interval()).await;
                }
            }
        }

        let messages = self.backend.list_messages(&thread_id).await?;
        let response_text = messages
            .iter()
            .filter(|m| m.role == Role::Assistant && m.run_id.as_deref() == Some(run_id.as_str()))
            .max_by_key(|m| m.created_at)
            .and_then(|m| m.text.clone())
            .ok_or(Error::NoResponse)?;

        let mut unlock_triggered = false;
        let mut advance = None;
        if req.chat_type == ChatType::LessonRecitation {
            if let Some(token) = extract_unlock_signal(&response_text) {
                // validated above: recitation always carries a lesson id
                let lesson_id = req.lesson_id.as_deref().unwrap_or_default();
                match self
                    .tracker
                    .advance(&req.student_id, &req.course_id, lesson_id, token)
                    .await
                {
                    Ok(receipt) => {
                        unlock_triggered = true;
                        advance = Some(receipt.outcome);
                    }
                    Err(
                        e @ (Error::IncorrectUnlockCode(_)
                        | Error::LessonNotFound(_)
                        | Error::LessonLocked(_)),
                    ) => {
                        // mismatched signal: no partial credit, the turn succeeds
                        warn!(
                            "unlock signal for student {} lesson {} rejected: {}",
                            req.student_id, lesson_id, e
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(TurnResult {
            response_text,
            thread_id,
            unlock_triggered,
            advance,
        })
    }

    /// Personalized welcome line for a lesson, if its author configured one.
    pub async fn lesson_welcome(
        &self,
        student_id: &str,
        course_id: &str,
        lesson_id: &str,
    ) -> Result<Option<String>> {
        let (_, lesson) = self.catalog.find_lesson(course_id, lesson_id).await?;
        let Some(template) = lesson.welcome_message else {
            return Ok(None);
        };
        let profile = student::get_student_profile(&self.database, student_id)
            .await?
            .unwrap_or_default();
        let ctx = TemplateContext {
            profile: &profile,
            course_id,
            lesson_id: Some(lesson_id),
        };
        Ok(Some(render(&template, &ctx)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        progress::EnrollmentStatus,
        student::create_student,
        test_support::{memory_pool, sample_course},
        tutor::backend::mock::{MockBackend, ScriptedRun},
    };

    struct Fixture {
        manager: TutorSessionManager,
        tracker: ProgressTracker,
        backend: Arc<MockBackend>,
    }

    async fn fixture(backend: MockBackend, config: TutorConfig) -> Fixture {
        let database = memory_pool().await;
        let catalog = CourseCatalog::new(database.clone());
        let mut course = sample_course();
        course.knowledge_base = Some("Guide {firstName} through {courseId}.".to_string());
        catalog.import_course(&course).await.unwrap();
        create_student(
            &database,
            &StudentProfile {
                id: "s1".to_string(),
                first_name: "Dana".to_string(),
                last_name: "Reyes".to_string(),
                experience_level: "beginner".to_string(),
                industry: "real estate".to_string(),
            },
        )
        .await
        .unwrap();
        let tracker = ProgressTracker::new(catalog.clone(), database.clone());
        tracker.enroll("s1", "c1").await.unwrap();
        let backend = Arc::new(backend);
        let manager = TutorSessionManager::new(
            catalog,
            tracker.clone(),
            backend.clone(),
            config,
            database,
        );
        Fixture {
            manager,
            tracker,
            backend,
        }
    }

    fn fast_config() -> TutorConfig {
        TutorConfig {
            poll_interval_ms: 1,
            max_poll_attempts: 3,
            global_instructions: None,
        }
    }

    fn recitation(message: &str) -> TurnRequest {
        TurnRequest {
            student_id: "s1".to_string(),
            course_id: "c1".to_string(),
            lesson_id: Some("l1".to_string()),
            chat_type: ChatType::LessonRecitation,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn plain_reply_triggers_no_unlock() {
        let f = fixture(MockBackend::with_reply("Tell me more about topic one."), fast_config())
            .await;
        let result = f.manager.run_turn(recitation("I studied lesson one")).await.unwrap();
        assert_eq!(result.response_text, "Tell me more about topic one.");
        assert!(!result.unlock_triggered);
        assert!(result.advance.is_none());

        let enrollment = f.tracker.load_enrollment("s1", "c1").await.unwrap();
        assert_eq!(enrollment.current_lesson_id, "l1");
        assert!(enrollment.completed_lessons.is_empty());

        // instructions were personalized from the course knowledge base
        let instructions = f.backend.instructions();
        assert_eq!(instructions, vec!["Guide Dana through c1.".to_string()]);
        assert_eq!(f.backend.user_messages(&result.thread_id), vec!["I studied lesson one"]);
    }

    #[tokio::test]
    async fn unlock_signal_advances_progress() {
        let f = fixture(
            MockBackend::with_reply("Mastered! Your code: LESSON_UNLOCKED_ABC"),
            fast_config(),
        )
        .await;
        let result = f.manager.run_turn(recitation("recite lesson one")).await.unwrap();
        assert!(result.unlock_triggered);
        assert_eq!(
            result.advance,
            Some(AdvanceOutcome::Unlocked {
                next_lesson_id: "l2".to_string()
            })
        );
        let enrollment = f.tracker.load_enrollment("s1", "c1").await.unwrap();
        assert_eq!(enrollment.current_lesson_id, "l2");
        assert!(enrollment.completed_lessons.contains("l1"));
    }

    #[tokio::test]
    async fn wrong_token_is_no_unlock_not_an_error() {
        let f = fixture(
            MockBackend::with_reply("Done! LESSON_UNLOCKED_WRONG"),
            fast_config(),
        )
        .await;
        let result = f.manager.run_turn(recitation("recite")).await.unwrap();
        assert!(!result.unlock_triggered);
        assert!(result.advance.is_none());
        let enrollment = f.tracker.load_enrollment("s1", "c1").await.unwrap();
        assert_eq!(enrollment.current_lesson_id, "l1");
        assert!(enrollment.completed_lessons.is_empty());
    }

    #[tokio::test]
    async fn course_qa_never_unlocks() {
        let f = fixture(
            MockBackend::with_reply("Trivia: LESSON_UNLOCKED_ABC"),
            fast_config(),
        )
        .await;
        let result = f
            .manager
            .run_turn(TurnRequest {
                student_id: "s1".to_string(),
                course_id: "c1".to_string(),
                lesson_id: None,
                chat_type: ChatType::CourseQa,
                message: "what unlocks lessons?".to_string(),
            })
            .await
            .unwrap();
        assert!(!result.unlock_triggered);
        let enrollment = f.tracker.load_enrollment("s1", "c1").await.unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::InProgress);
        assert!(enrollment.completed_lessons.is_empty());
    }

    #[tokio::test]
    async fn thread_handle_is_reused_across_turns() {
        let backend = MockBackend::new();
        backend.push_run(ScriptedRun::completed("first"));
        backend.push_run(ScriptedRun::completed("second"));
        let f = fixture(backend, fast_config()).await;

        let first = f.manager.run_turn(recitation("one")).await.unwrap();
        let second = f.manager.run_turn(recitation("two")).await.unwrap();
        assert_eq!(first.thread_id, second.thread_id);
        assert_eq!(f.backend.threads_created(), 1);
        assert_eq!(f.backend.runs_started(), 2);
    }

    #[tokio::test]
    async fn run_stuck_in_progress_times_out_without_mutation() {
        let backend = MockBackend::new();
        backend.push_run(ScriptedRun {
            statuses: vec![RunState::Queued, RunState::InProgress],
            reply: Some("too late: LESSON_UNLOCKED_ABC".to_string()),
        });
        let f = fixture(backend, fast_config()).await;

        let err = f.manager.run_turn(recitation("recite")).await.unwrap_err();
        assert!(matches!(err, Error::RunTimeout { attempts: 3 }));
        assert!(err.is_retryable());
        let enrollment = f.tracker.load_enrollment("s1", "c1").await.unwrap();
        assert!(enrollment.completed_lessons.is_empty());
        assert_eq!(enrollment.current_lesson_id, "l1");
    }

    #[tokio::test]
    async fn backend_failure_states_surface_as_run_failed() {
        let backend = MockBackend::new();
        backend.push_run(ScriptedRun {
            statuses: vec![
                RunState::InProgress,
                RunState::Failed {
                    reason: "rate limited".to_string(),
                },
            ],
            reply: None,
        });
        let f = fixture(backend, fast_config()).await;
        let err = f.manager.run_turn(recitation("recite")).await.unwrap_err();
        match err {
            Error::RunFailed(reason) => assert_eq!(reason, "rate limited"),
            other => panic!("expected RunFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_run_without_reply_is_no_response() {
        let backend = MockBackend::new();
        backend.push_run(ScriptedRun {
            statuses: vec![RunState::Completed],
            reply: None,
        });
        let f = fixture(backend, fast_config()).await;
        let err = f.manager.run_turn(recitation("recite")).await.unwrap_err();
        assert!(matches!(err, Error::NoResponse));
    }

    #[tokio::test]
    async fn argument_validation_comes_first() {
        let f = fixture(MockBackend::new(), fast_config()).await;
        assert!(matches!(
            f.manager.run_turn(recitation("   ")).await.unwrap_err(),
            Error::InvalidArgument(_)
        ));
        let mut req = recitation("hello");
        req.lesson_id = None;
        assert!(matches!(
            f.manager.run_turn(req).await.unwrap_err(),
            Error::InvalidArgument(_)
        ));
        // nothing reached the backend
        assert_eq!(f.backend.threads_created(), 0);
    }

    #[tokio::test]
    async fn welcome_message_renders_profile_fields() {
        let database = memory_pool().await;
        let catalog = CourseCatalog::new(database.clone());
        let mut course = sample_course();
        course
            .modules
            .get_mut("m1")
            .unwrap()
            .lessons
            .get_mut("l1")
            .unwrap()
            .welcome_message = Some("Hello {firstName}, welcome to {lessonId}!".to_string());
        catalog.import_course(&course).await.unwrap();
        create_student(
            &database,
            &StudentProfile {
                id: "s1".to_string(),
                first_name: "Dana".to_string(),
                ..StudentProfile::default()
            },
        )
        .await
        .unwrap();
        let tracker = ProgressTracker::new(catalog.clone(), database.clone());
        let manager = TutorSessionManager::new(
            catalog,
            tracker,
            Arc::new(MockBackend::new()),
            fast_config(),
            database,
        );
        assert_eq!(
            manager.lesson_welcome("s1", "c1", "l1").await.unwrap(),
            Some("Hello Dana, welcome to l1!".to_string())
        );
        assert_eq!(manager.lesson_welcome("s1", "c1", "l2").await.unwrap(), None);
    }
}
