use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        CreateMessageRequestArgs, CreateRunRequestArgs, CreateThreadRequestArgs, MessageContent,
        MessageRole, RunStatus,
    },
};
use async_trait::async_trait;
use tracing::debug;

use super::{AssistantBackend, Role, RunState, ThreadMessage};
use crate::tutor::thread::ThreadKey;

/// Production backend over the OpenAI assistants API. The assistant id and
/// model override are deployment configuration; per-turn instructions come
/// from the session manager.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    assistant_id: String,
    model: Option<String>,
}

impl OpenAiBackend {
    pub fn new(client: Client<OpenAIConfig>, assistant_id: String, model: Option<String>) -> Self {
        Self {
            client,
            assistant_id,
            model,
        }
    }

    /// Build from `OPENAI_API_KEY`, `OPENAI_ASSISTANT_ID` and optionally
    /// `OPENAI_BASE_URL` / `AI_MODEL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let api_key = dotenvy::var("OPENAI_API_KEY")?;
        let assistant_id = dotenvy::var("OPENAI_ASSISTANT_ID")?;
        let mut config = OpenAIConfig::default().with_api_key(api_key);
        if let Ok(base_url) = dotenvy::var("OPENAI_BASE_URL") {
            config = config.with_api_base(base_url);
        }
        let model = dotenvy::var("AI_MODEL").ok();
        Ok(Self::new(Client::with_config(config), assistant_id, model))
    }
}

#[async_trait]
impl AssistantBackend for OpenAiBackend {
    async fn create_thread(&self, key: &ThreadKey) -> anyhow::Result<String> {
        let request = CreateThreadRequestArgs::default().build()?;
        let thread = self.client.threads().create(request).await?;
        debug!(
            "created thread {} for student {} course {}",
            thread.id, key.student_id, key.course_id
        );
        Ok(thread.id)
    }

    async fn post_message(&self, thread_id: &str, text: &str) -> anyhow::Result<()> {
        let request = CreateMessageRequestArgs::default()
            .role(MessageRole::User)
            .content(text.to_string())
            .build()?;
        self.client
            .threads()
            .messages(thread_id)
            .create(request)
            .await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, instructions: &str) -> anyhow::Result<String> {
        let mut request = CreateRunRequestArgs::default();
        request
            .assistant_id(&self.assistant_id)
            .instructions(instructions);
        if let Some(model) = &self.model {
            request.model(model.as_str());
        }
        let run = self
            .client
            .threads()
            .runs(thread_id)
            .create(request.build()?)
            .await?;
        Ok(run.id)
    }

    async fn run_status(&self, thread_id: &str, run_id: &str) -> anyhow::Result<RunState> {
        let run = self
            .client
            .threads()
            .runs(thread_id)
            .retrieve(run_id)
            .await?;
        let state = match run.status {
            RunStatus::Queued => RunState::Queued,
            RunStatus::InProgress | RunStatus::Cancelling => RunState::InProgress,
            RunStatus::Completed => RunState::Completed,
            RunStatus::Cancelled => RunState::Cancelled,
            RunStatus::Expired => RunState::Expired,
            // the core registers no tools; a tool-call wait can only stall
            RunStatus::RequiresAction => RunState::Failed {
                reason: "run requires tool action the tutor does not support".to_string(),
            },
            RunStatus::Failed | RunStatus::Incomplete => RunState::Failed {
                reason: run
                    .last_error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            },
        };
        Ok(state)
    }

    async fn list_messages(&self, thread_id: &str) -> anyhow::Result<Vec<ThreadMessage>> {
        let list = self
            .client
            .threads()
            .messages(thread_id)
            .list(&[("limit", "50")])
            .await?;
        let messages = list
            .data
            .into_iter()
            .map(|m| {
                let text = m.content.iter().find_map(|c| match c {
                    MessageContent::Text(t) => Some(t.text.value.clone()),
                    _ => None,
                });
                ThreadMessage {
                    role: match m.role {
                        MessageRole::Assistant => Role::Assistant,
                        MessageRole::User => Role::User,
                    },
                    run_id: m.run_id,
                    text,
                    created_at: m.created_at as i64,
                }
            })
            .collect();
        Ok(messages)
    }
}
