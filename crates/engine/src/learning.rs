//! Learning context manager — cross-conversation notes and the milestone
//! note scheduler.
//!
//! A learning note distills one conversation-so-far. Notes seed the first
//! turn of sibling conversations in the same room; they are regenerated
//! whenever a conversation's message count crosses a milestone (a positive
//! multiple of the configured interval).
//!
//! Concurrency: note generation for a single conversation is at-most-one
//! concurrent. A per-conversation async lock serializes generation within
//! this process, and the store's conditional upsert discards any stale
//! writer that slips through (two workers, two processes). Generation is
//! best-effort: failures are logged and dropped, never propagated to the
//! message path.

use crate::token;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use studyloom_core::error::Error;
use studyloom_core::message::{ChatMessage, ConversationId, RoomId, Turn};
use studyloom_core::note::LearningNote;
use studyloom_core::provider::ChatRequest;
use studyloom_core::store::Store;
use studyloom_providers::FailoverController;
use tracing::{debug, info, warn};

const NOTE_MAX_TOKENS: u32 = 300;

const NOTE_SYSTEM_PROMPT: &str =
    "You are distilling a learning conversation into a compact note for future \
     sessions. Capture what the learner worked on, what they came to understand, \
     where they struggled, and any preferences they expressed. Write 3-5 plain \
     sentences. Do not address the learner.";

/// Manages learning notes for conversations.
pub struct LearningContextManager {
    store: Arc<dyn Store>,
    failover: Arc<FailoverController>,
    milestone_interval: i64,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LearningContextManager {
    pub fn new(
        store: Arc<dyn Store>,
        failover: Arc<FailoverController>,
        milestone_interval: i64,
    ) -> Self {
        Self {
            store,
            failover,
            milestone_interval: milestone_interval.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Assemble cross-conversation context for seeding a new conversation.
    ///
    /// Concatenates the note of every *other* conversation in the room,
    /// each attributed to its step label, ordered by conversation creation
    /// time. Empty string when no sibling notes exist. A conversation's
    /// own note is never included.
    pub async fn context_for_new_conversation(
        &self,
        room: &RoomId,
        excluding: &ConversationId,
    ) -> Result<String, Error> {
        let notes = self.store.notes_for_room(room, excluding).await?;
        let sections: Vec<String> = notes
            .iter()
            .map(|n| format!("[{}] {}", n.step_label, n.note.text))
            .collect();
        Ok(sections.join("\n\n"))
    }

    /// Check for a milestone and (re)generate the conversation's note if
    /// one was reached. Called after every durably stored message.
    ///
    /// Safe to call redundantly and concurrently; a milestone is only
    /// acted on once. Errors never reach the caller's message path — run
    /// this detached (see [`Self::spawn_note_check`]).
    pub async fn maybe_generate_note(&self, conversation: &ConversationId) -> Result<(), Error> {
        let count = self.store.message_count(conversation).await?;
        if count == 0 || count % self.milestone_interval != 0 {
            return Ok(());
        }

        // Serialize per conversation: two messages crossing the same
        // boundary must not interleave two note-writes.
        let lock = self.lock_for(conversation);
        let _guard = lock.lock().await;

        // Re-check under the lock — the earlier writer may already have
        // covered this milestone.
        if let Some(existing) = self.store.get_note(conversation).await? {
            if existing.message_count >= count {
                debug!(
                    conversation = %conversation,
                    message_count = count,
                    "Milestone already noted, skipping"
                );
                return Ok(());
            }
        }

        let turns = self.store.list_turns(conversation).await?;
        let request = Self::note_request(&turns);
        let (reply, report) = self.failover.execute_network(request).await.map_err(Error::from)?;

        let note = LearningNote {
            conversation_id: conversation.clone(),
            text: reply.text,
            message_count: count,
            updated_at: Utc::now(),
        };

        let written = self.store.upsert_note_if_newer(&note).await?;
        if written {
            info!(
                conversation = %conversation,
                message_count = count,
                provider = %report.provider_used,
                "Learning note regenerated"
            );
        } else {
            debug!(
                conversation = %conversation,
                message_count = count,
                "Note write discarded, a newer note already exists"
            );
        }

        Ok(())
    }

    /// Fire-and-forget wrapper: runs the milestone check on a detached
    /// task and logs failures instead of surfacing them.
    pub fn spawn_note_check(self: Arc<Self>, conversation: ConversationId) {
        let manager = self;
        tokio::spawn(async move {
            if let Err(error) = manager.maybe_generate_note(&conversation).await {
                warn!(
                    conversation = %conversation,
                    %error,
                    "Note generation failed, will retry at next milestone"
                );
            }
        });
    }

    /// Build the summarization request over the full turn history.
    ///
    /// The transcript is rendered into a single user message so the
    /// request is valid regardless of role alternation in the log.
    fn note_request(turns: &[Turn]) -> ChatRequest {
        let mut transcript = String::new();
        for turn in turns {
            transcript.push_str(turn.role.as_str());
            transcript.push_str(": ");
            transcript.push_str(&turn.text);
            transcript.push('\n');
        }
        debug!(
            turns = turns.len(),
            estimated_tokens = token::estimate_tokens(&transcript),
            "Built note transcript"
        );

        ChatRequest::new(
            vec![ChatMessage::user(format!(
                "Summarize this conversation:\n\n{transcript}"
            ))],
            NOTE_SYSTEM_PROMPT,
            NOTE_MAX_TOKENS,
        )
    }

    fn lock_for(&self, conversation: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("note lock map poisoned");
        locks
            .entry(conversation.0.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_controller, memory_store, AlwaysFailing, ScriptedProvider};
    use studyloom_core::error::ProviderError;
    use studyloom_core::message::Role;
    use studyloom_core::provider::Provider;
    use studyloom_core::room::Step;

    fn steps() -> Vec<Step> {
        vec![
            Step::new(1, "1. Explore", "Brainstorm widely"),
            Step::new(2, "2. Decide", "Choose one"),
        ]
    }

    async fn manager_with(
        provider: Arc<ScriptedProvider>,
        interval: i64,
    ) -> (Arc<LearningContextManager>, Arc<dyn Store>) {
        let store = memory_store().await;
        let failover = fast_controller(vec![provider]);
        let manager = Arc::new(LearningContextManager::new(
            Arc::clone(&store),
            failover,
            interval,
        ));
        (manager, store)
    }

    #[tokio::test]
    async fn no_note_before_milestone() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (manager, store) = manager_with(provider.clone(), 5).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        for i in 0..3 {
            store
                .append_turn(&conv.id, Role::User, &format!("msg {i}"), false)
                .await
                .unwrap();
        }

        manager.maybe_generate_note(&conv.id).await.unwrap();
        assert!(store.get_note(&conv.id).await.unwrap().is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn note_generated_at_milestone() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        provider.push_reply(studyloom_core::provider::ChatReply::full(
            "learner grasped the basics",
        ));
        let (manager, store) = manager_with(provider.clone(), 5).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store
                .append_turn(&conv.id, role, &format!("msg {i}"), false)
                .await
                .unwrap();
        }

        manager.maybe_generate_note(&conv.id).await.unwrap();

        let note = store.get_note(&conv.id).await.unwrap().unwrap();
        assert_eq!(note.message_count, 5);
        assert_eq!(note.text, "learner grasped the basics");
    }

    #[tokio::test]
    async fn concurrent_milestone_triggers_write_one_note() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (manager, store) = manager_with(provider.clone(), 2).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        store.append_turn(&conv.id, Role::User, "q", false).await.unwrap();
        store.append_turn(&conv.id, Role::Assistant, "a", false).await.unwrap();

        // Two workers observe the same milestone at once.
        let (a, b) = tokio::join!(
            manager.maybe_generate_note(&conv.id),
            manager.maybe_generate_note(&conv.id),
        );
        a.unwrap();
        b.unwrap();

        let note = store.get_note(&conv.id).await.unwrap().unwrap();
        assert_eq!(note.message_count, 2);
        // The second writer re-checked under the lock and skipped — only
        // one summarization call went out.
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn milestone_check_is_idempotent_sequentially() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (manager, store) = manager_with(provider.clone(), 2).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        store.append_turn(&conv.id, Role::User, "q", false).await.unwrap();
        store.append_turn(&conv.id, Role::Assistant, "a", false).await.unwrap();

        manager.maybe_generate_note(&conv.id).await.unwrap();
        manager.maybe_generate_note(&conv.id).await.unwrap();
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn note_failure_is_reported_but_leaves_no_row() {
        let failing: Arc<dyn Provider> = Arc::new(AlwaysFailing::new(
            "down",
            ProviderError::AuthenticationFailed("bad".into()),
        ));
        let store = memory_store().await;
        let failover = fast_controller(vec![failing]);
        let manager = LearningContextManager::new(Arc::clone(&store), failover, 2);

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        store.append_turn(&conv.id, Role::User, "q", false).await.unwrap();
        store.append_turn(&conv.id, Role::Assistant, "a", false).await.unwrap();

        // Exhausted network chain → the milestone is skipped this time.
        assert!(manager.maybe_generate_note(&conv.id).await.is_err());
        assert!(store.get_note(&conv.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn context_assembled_with_step_attribution() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (manager, store) = manager_with(provider.clone(), 5).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv_a = store.create_conversation(&room.id, "step1").await.unwrap();
        let conv_b = store.create_conversation(&room.id, "step2").await.unwrap();

        store
            .upsert_note_if_newer(&LearningNote {
                conversation_id: conv_a.id.clone(),
                text: "covered the fundamentals".into(),
                message_count: 5,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let context = manager
            .context_for_new_conversation(&room.id, &conv_b.id)
            .await
            .unwrap();
        assert!(context.contains("[1. Explore]"));
        assert!(context.contains("covered the fundamentals"));
    }

    #[tokio::test]
    async fn context_excludes_own_note() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (manager, store) = manager_with(provider.clone(), 5).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        store
            .upsert_note_if_newer(&LearningNote {
                conversation_id: conv.id.clone(),
                text: "own note".into(),
                message_count: 5,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let context = manager
            .context_for_new_conversation(&room.id, &conv.id)
            .await
            .unwrap();
        assert!(context.is_empty());
    }
}
