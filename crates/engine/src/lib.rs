//! Response orchestration for studyloom.
//!
//! Decides what to send to an LLM provider on every conversational turn:
//! the history window bounds prompt cost, the archetype classifier adapts
//! guidance to the current step's intent, learning notes carry distilled
//! insight across conversations, and the failover controller guarantees a
//! reply even with every network provider down.

pub mod archetype;
pub mod compose;
pub mod engine;
pub mod history;
pub mod learning;
pub mod refine;
pub mod token;

#[cfg(test)]
mod test_support;

pub use archetype::{infer_archetype, Archetype};
pub use compose::{compose_system_prompt, ToneDirective};
pub use engine::{AiReply, ResponseEngine};
pub use history::select_history;
pub use learning::LearningContextManager;
pub use refine::StepRefiner;
pub use token::estimate_tokens;
