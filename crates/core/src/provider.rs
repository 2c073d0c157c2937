//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a reply
//! back. The failover controller calls `call()` without knowing which
//! backend is behind it — pure polymorphism.
//!
//! Implementations: Anthropic-native, OpenAI-compatible, and the
//! deterministic template fallback.

use crate::error::ProviderError;
use crate::message::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The conversation window, ordered oldest → newest.
    pub messages: Vec<ChatMessage>,

    /// The composed system prompt.
    pub system_prompt: String,

    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, system_prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            messages,
            system_prompt: system_prompt.into(),
            max_tokens,
        }
    }
}

/// A complete reply from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    /// The generated text.
    pub text: String,

    /// Whether generation was cut off at the token limit.
    #[serde(default)]
    pub truncated: bool,
}

impl ChatReply {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
        }
    }
}

/// The core Provider trait.
///
/// Every backend implements this. Errors carry the transient/permanent
/// distinction the failover controller depends on — see
/// [`ProviderError::is_transient`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// A stable identifier for this provider (e.g. "anthropic", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete reply.
    async fn call(&self, request: ChatRequest) -> std::result::Result<ChatReply, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn request_construction() {
        let req = ChatRequest::new(
            vec![ChatMessage::user("hello")],
            "You are a tutor",
            400,
        );
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.max_tokens, 400);
    }

    #[test]
    fn reply_serialization_defaults_truncated() {
        let reply: ChatReply = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert!(!reply.truncated);
        assert_eq!(reply.text, "hi");
    }
}
