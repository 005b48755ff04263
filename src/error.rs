pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Course not found: {0}")]
    CourseNotFound(String),
    #[error("Module not found: {0}")]
    ModuleNotFound(String),
    #[error("Lesson not found: {0}")]
    LessonNotFound(String),
    #[error("No enrollment for student {student_id} in course {course_id}")]
    EnrollmentNotFound {
        student_id: String,
        course_id: String,
    },
    #[error("Incorrect unlock code for lesson {0}")]
    IncorrectUnlockCode(String),
    #[error("Lesson {0} is not unlocked for this enrollment")]
    LessonLocked(String),
    #[error("Assistant run did not finish within {attempts} status checks")]
    RunTimeout { attempts: u32 },
    #[error("Assistant run failed: {0}")]
    RunFailed(String),
    #[error("Assistant returned no usable response")]
    NoResponse,
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Backend-originated failures the caller may retry by resubmitting
    /// the same message. Everything else is either caller-correctable or
    /// a data/configuration problem.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RunTimeout { .. } | Error::RunFailed(_) | Error::NoResponse
        )
    }

    /// Message safe to surface to the student. `Internal` is deliberately
    /// generic; the detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidArgument(msg) => format!("Invalid request: {msg}"),
            Error::CourseNotFound(_) | Error::ModuleNotFound(_) | Error::LessonNotFound(_) => {
                "The requested course content could not be found. Please contact support."
                    .to_string()
            }
            Error::EnrollmentNotFound { .. } => {
                "You are not enrolled in this course.".to_string()
            }
            Error::IncorrectUnlockCode(_) => {
                "Incorrect unlock code. Please try again.".to_string()
            }
            Error::LessonLocked(_) => {
                "This lesson is not unlocked yet. Complete the previous lesson first.".to_string()
            }
            Error::RunTimeout { .. } | Error::RunFailed(_) | Error::NoResponse => {
                "The AI tutor could not answer right now. Please resend your message.".to_string()
            }
            Error::Internal(_) => "Something went wrong. Please try again later.".to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Internal(e.into())
    }
}
