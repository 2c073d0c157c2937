//! Room, Step, and refinement-history domain types.
//!
//! A room is a collaborative container with a goal statement and an ordered
//! list of learning steps. Conversations are opened against one step each.

use crate::message::RoomId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ordered learning stage within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Stable key, always sequential: "step1".."stepN".
    pub key: String,

    /// Display label, normalized to start with its ordinal ("1. ...").
    pub label: String,

    /// Free-text instruction describing what this stage asks of the learner.
    pub instruction: String,

    /// 1-based position within the room's step list.
    pub position: i64,
}

impl Step {
    pub fn new(position: i64, label: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            key: format!("step{position}"),
            label: label.into(),
            instruction: instruction.into(),
            position,
        }
    }
}

/// A collaborative container: goal statement plus ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub goal: String,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a step refinement.
///
/// The store writes the step replacement and the history record in one
/// transaction — they succeed or fail together.
#[derive(Debug, Clone)]
pub struct NewRefinement {
    pub preference_text: String,
    pub new_steps: Vec<Step>,
    pub summary: String,
}

/// An immutable record of one applied refinement, enabling one-click revert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementRecord {
    pub id: String,
    pub room_id: RoomId,
    pub preference_text: String,
    pub old_steps: Vec<Step>,
    pub new_steps: Vec<Step>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}
