//! Store trait — persistence boundary for rooms, conversations, and notes.
//!
//! The store is a conventional relational collaborator. What matters to the
//! engine is a handful of guarantees, all encoded in this trait:
//! - turns are append-only and totally ordered by insertion
//! - note upserts are conditional on `message_count` (a stale writer loses)
//! - step replacement and refinement-history insertion are one transaction

use crate::error::StoreError;
use crate::message::{Conversation, ConversationId, Role, RoomId, Turn};
use crate::note::{LearningNote, RoomNote};
use crate::room::{NewRefinement, RefinementRecord, Room, Step};
use async_trait::async_trait;

/// The persistence trait.
///
/// Implementations: SQLite (production), and whatever a test needs.
#[async_trait]
pub trait Store: Send + Sync {
    /// The backend name (e.g. "sqlite").
    fn name(&self) -> &str;

    // --- Rooms & steps ---

    /// Create a room with its initial ordered step list.
    async fn create_room(&self, goal: &str, steps: &[Step]) -> Result<Room, StoreError>;

    async fn get_room(&self, id: &RoomId) -> Result<Option<Room>, StoreError>;

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// The room's steps in position order.
    async fn list_steps(&self, room: &RoomId) -> Result<Vec<Step>, StoreError>;

    /// Replace a room's steps and record the refinement, atomically.
    async fn replace_steps_with_history(
        &self,
        room: &RoomId,
        refinement: NewRefinement,
    ) -> Result<RefinementRecord, StoreError>;

    async fn get_refinement(&self, id: &str) -> Result<Option<RefinementRecord>, StoreError>;

    /// Refinement history for a room, newest first.
    async fn list_refinements(&self, room: &RoomId) -> Result<Vec<RefinementRecord>, StoreError>;

    // --- Conversations & turns ---

    async fn create_conversation(
        &self,
        room: &RoomId,
        step_key: &str,
    ) -> Result<Conversation, StoreError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Conversations in a room, oldest first (creation order).
    async fn list_conversations(&self, room: &RoomId) -> Result<Vec<Conversation>, StoreError>;

    /// Append one turn; the store assigns the next dense index.
    async fn append_turn(
        &self,
        conversation: &ConversationId,
        role: Role,
        text: &str,
        truncated: bool,
    ) -> Result<Turn, StoreError>;

    /// All turns, ordered by index ascending.
    async fn list_turns(&self, conversation: &ConversationId) -> Result<Vec<Turn>, StoreError>;

    /// Total stored turns for a conversation.
    async fn message_count(&self, conversation: &ConversationId) -> Result<i64, StoreError>;

    // --- Learning notes ---

    async fn get_note(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<LearningNote>, StoreError>;

    /// Insert-or-update the note for a conversation, keyed by conversation
    /// id, but only if `note.message_count` is greater than what is stored.
    /// Returns whether a write happened — a stale concurrent writer gets
    /// `false` and its result is discarded.
    async fn upsert_note_if_newer(&self, note: &LearningNote) -> Result<bool, StoreError>;

    /// The most recent note of every *other* conversation in the room,
    /// paired with its conversation's step label, ordered by conversation
    /// creation time.
    async fn notes_for_room(
        &self,
        room: &RoomId,
        excluding: &ConversationId,
    ) -> Result<Vec<RoomNote>, StoreError>;
}
