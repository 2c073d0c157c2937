//! Conversation, Turn, and wire-message domain types.
//!
//! These are the core value objects that flow through the system:
//! a user sends a message → the engine selects history and composes a
//! prompt → a provider generates a reply → a new turn is appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single turn in a conversation.
///
/// Immutable once stored. A truncated assistant reply is *continued* by
/// appending a new turn, never by mutating the original. Turns are strictly
/// ordered by `index` (insertion order) and never reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Position within the conversation (0-based, dense).
    pub index: i64,

    /// Who authored this turn.
    pub role: Role,

    /// The text content.
    pub text: String,

    /// When this turn was stored.
    pub created_at: DateTime<Utc>,

    /// Whether the provider cut this reply off at the token limit.
    #[serde(default)]
    pub truncated: bool,
}

/// A lightweight message as sent over the wire to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    /// Convert a stored turn into its wire form.
    pub fn from_turn(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            text: turn.text.clone(),
        }
    }
}

/// Conversation metadata. The turn log itself lives in the store and is
/// fetched separately — a conversation row is small and cheap to pass around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID.
    pub id: ConversationId,

    /// The room this conversation belongs to.
    pub room_id: RoomId,

    /// The step this conversation was opened against (e.g. "step2").
    pub step_key: String,

    /// When this conversation was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_as_str() {
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn chat_message_from_turn() {
        let turn = Turn {
            index: 3,
            role: Role::Assistant,
            text: "an answer".into(),
            created_at: Utc::now(),
            truncated: false,
        };
        let msg = ChatMessage::from_turn(&turn);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.text, "an answer");
    }

    #[test]
    fn turn_serialization_roundtrip() {
        let turn = Turn {
            index: 0,
            role: Role::User,
            text: "hello".into(),
            created_at: Utc::now(),
            truncated: false,
        };
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text, "hello");
        assert_eq!(back.role, Role::User);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(ConversationId::new().0, ConversationId::new().0);
        assert_ne!(RoomId::new().0, RoomId::new().0);
    }
}
