//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI and any endpoint exposing a `/chat/completions`
//! surface (proxies, gateways, local inference servers).
//!
//! The system prompt travels as a leading `system` role message;
//! `finish_reason: "length"` maps to the truncated flag.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use studyloom_core::error::ProviderError;
use studyloom_core::message::Role;
use studyloom_core::provider::{ChatReply, ChatRequest, Provider};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Override the model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Convert our wire messages to OpenAI API format, system prompt first.
    fn to_api_messages(request: &ChatRequest) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            out.push(ApiMessage {
                role: "system".into(),
                content: request.system_prompt.clone(),
            });
        }
        for m in &request.messages {
            out.push(ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                },
                content: m.text.clone(),
            });
        }
        out
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request),
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        debug!(provider = %self.name, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            // A 429 carrying "insufficient_quota" is billing exhaustion, not
            // throttling — permanent for this billing period.
            let error_body = response.text().await.unwrap_or_default();
            if error_body.contains("insufficient_quota") {
                return Err(ProviderError::QuotaExhausted(error_body));
            }
            return Err(ProviderError::RateLimited { retry_after_secs: 5 });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: CompletionResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse completion response: {e}"),
            })?;

        api_resp.into_reply()
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionResponse {
    fn into_reply(self) -> Result<ChatReply, ProviderError> {
        let choice = self.choices.into_iter().next().ok_or_else(|| {
            ProviderError::ApiError {
                status_code: 200,
                message: "Completion response contained no choices".into(),
            }
        })?;

        Ok(ChatReply {
            text: choice.message.content.unwrap_or_default(),
            truncated: choice.finish_reason.as_deref() == Some("length"),
        })
    }
}
