//! Learning note domain types.
//!
//! A learning note is a synthesized, periodically updated summary of one
//! conversation, used to seed context for sibling conversations in the same
//! room. One note per conversation; overwritten at each milestone.

use crate::message::ConversationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The distilled synthesis of one conversation-so-far.
///
/// Invariant: `message_count` is always a positive multiple of the configured
/// milestone interval, and the stored note is never older than the most
/// recent milestone actually reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningNote {
    /// The conversation this note summarizes (unique per conversation).
    pub conversation_id: ConversationId,

    /// The free-text synthesis.
    pub text: String,

    /// Message count at which this note was generated.
    pub message_count: i64,

    /// When this note was last (re)generated.
    pub updated_at: DateTime<Utc>,
}

/// A note paired with the step label of its conversation, as returned when
/// assembling cross-conversation context for a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomNote {
    pub step_label: String,
    pub note: LearningNote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_serialization_roundtrip() {
        let note = LearningNote {
            conversation_id: ConversationId::from("conv_1"),
            text: "The learner grasped recursion via tree examples".into(),
            message_count: 5,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&note).unwrap();
        let back: LearningNote = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_count, 5);
        assert!(back.text.contains("recursion"));
    }
}
