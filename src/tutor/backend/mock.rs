//! Scripted in-process backend for tests. Runs, poll status sequences and
//! assistant replies are queued up front; the mock records everything the
//! session manager does so tests can assert on it.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;

use super::{AssistantBackend, Role, RunState, ThreadMessage};
use crate::tutor::thread::ThreadKey;

#[derive(Debug, Clone)]
pub struct ScriptedRun {
    /// Status returned per poll; the last entry repeats once exhausted.
    pub statuses: Vec<RunState>,
    /// Assistant reply attached to the thread for this run.
    pub reply: Option<String>,
}

impl ScriptedRun {
    pub fn completed(reply: &str) -> Self {
        Self {
            statuses: vec![RunState::Completed],
            reply: Some(reply.to_string()),
        }
    }
}

#[derive(Default)]
struct MockState {
    scripts: VecDeque<ScriptedRun>,
    runs: HashMap<String, ScriptedRun>,
    polls: HashMap<String, usize>,
    messages: HashMap<String, Vec<ThreadMessage>>,
    instructions: Vec<String>,
    thread_seq: u64,
    run_seq: u64,
    clock: i64,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(reply: &str) -> Self {
        let backend = Self::new();
        backend.push_run(ScriptedRun::completed(reply));
        backend
    }

    pub fn push_run(&self, run: ScriptedRun) {
        self.state.lock().unwrap().scripts.push_back(run);
    }

    pub fn threads_created(&self) -> u64 {
        self.state.lock().unwrap().thread_seq
    }

    pub fn runs_started(&self) -> u64 {
        self.state.lock().unwrap().run_seq
    }

    /// Instructions passed to each started run, in order.
    pub fn instructions(&self) -> Vec<String> {
        self.state.lock().unwrap().instructions.clone()
    }

    pub fn user_messages(&self, thread_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .messages
            .get(thread_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.role == Role::User)
                    .filter_map(|m| m.text.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl AssistantBackend for MockBackend {
    async fn create_thread(&self, _key: &ThreadKey) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.thread_seq += 1;
        let thread_id = format!("thread-{}", state.thread_seq);
        state.messages.insert(thread_id.clone(), Vec::new());
        Ok(thread_id)
    }

    async fn post_message(&self, thread_id: &str, text: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        let created_at = state.clock;
        state
            .messages
            .entry(thread_id.to_string())
            .or_default()
            .push(ThreadMessage {
                role: Role::User,
                run_id: None,
                text: Some(text.to_string()),
                created_at,
            });
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, instructions: &str) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.run_seq += 1;
        let run_id = format!("run-{}", state.run_seq);
        state.instructions.push(instructions.to_string());
        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| ScriptedRun::completed("(unscripted reply)"));
        if let Some(reply) = &script.reply {
            state.clock += 1;
            let created_at = state.clock;
            state
                .messages
                .entry(thread_id.to_string())
                .or_default()
                .push(ThreadMessage {
                    role: Role::Assistant,
                    run_id: Some(run_id.clone()),
                    text: Some(reply.clone()),
                    created_at,
                });
        }
        state.runs.insert(run_id.clone(), script);
        state.polls.insert(run_id.clone(), 0);
        Ok(run_id)
    }

    async fn run_status(&self, _thread_id: &str, run_id: &str) -> anyhow::Result<RunState> {
        let mut state = self.state.lock().unwrap();
        let poll = state.polls.entry(run_id.to_string()).or_insert(0);
        let index = *poll;
        *poll += 1;
        let script = state
            .runs
            .get(run_id)
            .ok_or_else(|| anyhow::anyhow!("unknown run {run_id}"))?;
        let status = script
            .statuses
            .get(index)
            .or_else(|| script.statuses.last())
            .cloned()
            .unwrap_or(RunState::Completed);
        Ok(status)
    }

    async fn list_messages(&self, thread_id: &str) -> anyhow::Result<Vec<ThreadMessage>> {
        let state = self.state.lock().unwrap();
        let mut messages = state
            .messages
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        // newest first, as the real backend lists them
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(messages)
    }
}
