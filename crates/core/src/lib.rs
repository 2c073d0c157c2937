//! # Studyloom Core
//!
//! Domain types, traits, and error definitions for the studyloom AI response
//! orchestration engine. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod note;
pub mod provider;
pub mod room;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, RefineError, Result, StoreError};
pub use message::{ChatMessage, Conversation, ConversationId, Role, RoomId, Turn};
pub use note::{LearningNote, RoomNote};
pub use provider::{ChatReply, ChatRequest, Provider};
pub use room::{NewRefinement, RefinementRecord, Room, Step};
pub use store::Store;
