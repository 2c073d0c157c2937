//! LLM provider implementations for studyloom.
//!
//! All providers implement the `studyloom_core::Provider` trait. The
//! failover controller attempts them in configured priority order and
//! terminates in the deterministic template fallback.

pub mod anthropic;
pub mod failover;
pub mod openai_compat;
pub mod retry;
pub mod template;

pub use anthropic::AnthropicProvider;
pub use failover::{AttemptOutcome, AttemptRecord, FailoverController, FailoverReport};
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryPolicy;
pub use template::TemplateFallback;
