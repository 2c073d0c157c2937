//! Template fallback — the deterministic terminal provider.
//!
//! When every network provider is exhausted, the failover controller asks
//! this provider for a canned response keyed by conversational intent. It
//! needs no network, cannot fail, and never returns an empty reply — the
//! request/response path therefore never surfaces a raw provider failure.

use async_trait::async_trait;
use studyloom_core::error::ProviderError;
use studyloom_core::message::Role;
use studyloom_core::provider::{ChatReply, ChatRequest, Provider};
use tracing::info;

/// Conversational intent inferred from the most recent user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Summary,
    Stuck,
    Question,
    Default,
}

const UNAVAILABLE_NOTICE: &str =
    "(The AI tutor is temporarily unavailable — this is an automated interim response.)";

/// The static response table. One entry per intent; selection is
/// deterministic for a given input.
const RESPONSES: &[(Intent, &str)] = &[
    (
        Intent::Greeting,
        "Hello! I can't generate a full response right now, but your message \
         has been saved. Feel free to describe what you'd like to work on and \
         I'll pick it up as soon as I'm back.",
    ),
    (
        Intent::Summary,
        "I can't produce a fresh summary at the moment. The discussion so far \
         is saved in full — ask again shortly and I'll recap it for you.",
    ),
    (
        Intent::Stuck,
        "It sounds like you're stuck — that's a normal part of working through \
         a hard step. Try restating the problem in your own words, or noting \
         exactly where your understanding stops. I'll respond properly as soon \
         as I'm available again.",
    ),
    (
        Intent::Question,
        "That's a good question, and it deserves a real answer. I can't reach \
         my reasoning service right now — your question is saved, so please \
         ask it again in a moment.",
    ),
    (
        Intent::Default,
        "Your message has been saved. I can't generate a full response right \
         now, but the conversation will continue normally as soon as the \
         service recovers.",
    ),
];

/// A provider that answers from a static lookup table.
pub struct TemplateFallback;

impl TemplateFallback {
    pub fn new() -> Self {
        Self
    }

    /// Classify the most recent user message into an intent bucket.
    pub fn classify(request: &ChatRequest) -> Intent {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.to_lowercase())
            .unwrap_or_default();
        let text = last_user.trim();

        let greeting_words = ["hi", "hello", "hey", "good morning", "good evening"];
        if greeting_words.iter().any(|w| text.starts_with(w)) && text.len() < 40 {
            return Intent::Greeting;
        }

        if ["summarize", "summary", "recap", "sum up"]
            .iter()
            .any(|w| text.contains(w))
        {
            return Intent::Summary;
        }

        if ["stuck", "confused", "lost", "don't understand", "no idea"]
            .iter()
            .any(|w| text.contains(w))
        {
            return Intent::Stuck;
        }

        if text.ends_with('?')
            || ["what", "why", "how", "when", "where", "who", "can ", "could ", "should "]
                .iter()
                .any(|w| text.starts_with(w))
        {
            return Intent::Question;
        }

        Intent::Default
    }

    fn response_for(intent: Intent) -> &'static str {
        RESPONSES
            .iter()
            .find(|(i, _)| *i == intent)
            .map(|(_, text)| *text)
            .unwrap_or(RESPONSES[RESPONSES.len() - 1].1)
    }
}

impl Default for TemplateFallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for TemplateFallback {
    fn name(&self) -> &str {
        "template"
    }

    async fn call(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        let intent = Self::classify(&request);
        info!(?intent, "Template fallback answering");
        Ok(ChatReply {
            text: format!("{UNAVAILABLE_NOTICE}\n\n{}", Self::response_for(intent)),
            truncated: false,
        })
    }
}
