pub mod mock;
pub mod openai;

use async_trait::async_trait;

use super::thread::ThreadKey;

/// Lifecycle states of one assistant run, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Queued,
    InProgress,
    Completed,
    Failed { reason: String },
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One message inside a backend thread. `text` is `None` for non-text
/// content the core cannot use.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub role: Role,
    pub run_id: Option<String>,
    pub text: Option<String>,
    pub created_at: i64,
}

/// The language-model backend as the session manager sees it: an opaque
/// thread handle, message submission, and an asynchronous run lifecycle
/// observed by polling. Transport failures surface as `anyhow` errors and
/// are wrapped into the internal error class by the caller.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn create_thread(&self, key: &ThreadKey) -> anyhow::Result<String>;
    async fn post_message(&self, thread_id: &str, text: &str) -> anyhow::Result<()>;
    async fn start_run(&self, thread_id: &str, instructions: &str) -> anyhow::Result<String>;
    async fn run_status(&self, thread_id: &str, run_id: &str) -> anyhow::Result<RunState>;
    /// Messages of the thread, newest first where the backend defines an
    /// order; callers select by `run_id`/`created_at`, not position.
    async fn list_messages(&self, thread_id: &str) -> anyhow::Result<Vec<ThreadMessage>>;
}
