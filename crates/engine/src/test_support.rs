//! Shared test fixtures: scripted providers and an in-memory store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use studyloom_config::RetryConfig;
use studyloom_core::error::ProviderError;
use studyloom_core::provider::{ChatReply, ChatRequest, Provider};
use studyloom_core::store::Store;
use studyloom_providers::{FailoverController, RetryPolicy};
use studyloom_store::SqliteStore;

/// A provider that replays a scripted sequence of results, then echoes.
/// Records every request's system prompt for assertions.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<ChatReply, ProviderError>>>,
    pub system_prompts: Mutex<Vec<String>>,
    call_count: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            system_prompts: Mutex::new(Vec::new()),
            call_count: Mutex::new(0),
        }
    }

    pub fn push_reply(&self, reply: ChatReply) {
        self.script.lock().unwrap().push_back(Ok(reply));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn last_system_prompt(&self) -> String {
        self.system_prompts
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        *self.call_count.lock().unwrap() += 1;
        self.system_prompts
            .lock()
            .unwrap()
            .push(request.system_prompt.clone());

        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }

        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == studyloom_core::message::Role::User)
            .map(|m| m.text.clone())
            .unwrap_or_default();
        Ok(ChatReply::full(format!("echo: {last_user}")))
    }
}

/// A provider that always fails with a fixed error.
pub struct AlwaysFailing {
    name: String,
    error: ProviderError,
}

impl AlwaysFailing {
    pub fn new(name: &str, error: ProviderError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

#[async_trait::async_trait]
impl Provider for AlwaysFailing {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _request: ChatRequest) -> Result<ChatReply, ProviderError> {
        Err(self.error.clone())
    }
}

/// A failover controller with millisecond-scale retry timing.
pub fn fast_controller(chain: Vec<Arc<dyn Provider>>) -> Arc<FailoverController> {
    Arc::new(FailoverController::new(
        chain,
        RetryPolicy::new(&RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            request_timeout_secs: 20,
        }),
        Duration::from_millis(200),
        4,
    ))
}

pub async fn memory_store() -> Arc<dyn Store> {
    Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap())
}
