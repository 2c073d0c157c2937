//! The response engine — the caller-facing orchestration surface.
//!
//! Per inbound message: the history window manager selects recent turns,
//! the learning-context manager supplies cross-conversation notes on the
//! first turn of a new conversation, the archetype classifier labels the
//! current step, the prompt composer builds the system prompt, and the
//! failover controller produces the reply. The note scheduler runs as a
//! detached side effect after each stored message.

use crate::archetype::{infer_archetype, Archetype};
use crate::compose::{compose_system_prompt, ToneDirective};
use crate::history::select_history;
use crate::learning::LearningContextManager;
use std::sync::Arc;
use studyloom_config::AppConfig;
use studyloom_core::error::{Error, StoreError};
use studyloom_core::message::{ChatMessage, Conversation, ConversationId, Role};
use studyloom_core::provider::ChatRequest;
use studyloom_core::room::Step;
use studyloom_core::store::Store;
use studyloom_providers::{FailoverController, FailoverReport};
use tracing::{debug, info};

/// The reply returned to the web layer.
#[derive(Debug, Clone)]
pub struct AiReply {
    pub text: String,
    pub truncated: bool,
    pub provider_used: String,
    /// Per-attempt failover metadata for post-hoc debugging.
    pub report: FailoverReport,
}

/// Orchestrates response generation for conversations.
pub struct ResponseEngine {
    store: Arc<dyn Store>,
    failover: Arc<FailoverController>,
    learning: Arc<LearningContextManager>,
    max_tokens: u32,
    max_history_turns: usize,
    archetype_prompts_enabled: bool,
}

impl ResponseEngine {
    pub fn new(
        store: Arc<dyn Store>,
        failover: Arc<FailoverController>,
        config: &AppConfig,
    ) -> Self {
        let learning = Arc::new(LearningContextManager::new(
            Arc::clone(&store),
            Arc::clone(&failover),
            config.note_milestone_interval,
        ));
        Self {
            store,
            failover,
            learning,
            max_tokens: config.max_tokens,
            max_history_turns: config.max_history_turns,
            archetype_prompts_enabled: config.archetype_prompts_enabled,
        }
    }

    /// The learning-context manager, shared with callers that need to
    /// seed or inspect notes directly.
    pub fn learning(&self) -> &Arc<LearningContextManager> {
        &self.learning
    }

    /// Store a user message and generate the assistant's reply for it.
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        override_max_tokens: Option<u32>,
        tone: Option<ToneDirective>,
    ) -> Result<AiReply, Error> {
        self.store
            .append_turn(conversation_id, Role::User, text, false)
            .await?;
        Arc::clone(&self.learning).spawn_note_check(conversation_id.clone());

        self.get_ai_response(conversation_id, override_max_tokens, tone)
            .await
    }

    /// Generate a reply for a conversation whose latest turn is already
    /// stored. Appends the assistant turn and schedules the note check.
    ///
    /// This path never surfaces a raw provider failure — at worst the
    /// reply comes from the template fallback, attributed as such.
    pub async fn get_ai_response(
        &self,
        conversation_id: &ConversationId,
        override_max_tokens: Option<u32>,
        tone: Option<ToneDirective>,
    ) -> Result<AiReply, Error> {
        let conversation = self.require_conversation(conversation_id).await?;
        let turns = self.store.list_turns(conversation_id).await?;

        // Cross-chat notes seed only the first turn of a new conversation.
        let first_turn = turns.len() <= 1;
        let learning_context = if first_turn {
            self.learning
                .context_for_new_conversation(&conversation.room_id, conversation_id)
                .await?
        } else {
            String::new()
        };

        let window = select_history(&turns, self.max_history_turns);
        let messages: Vec<ChatMessage> = window.iter().map(ChatMessage::from_turn).collect();

        let system_prompt = self
            .compose_for(&conversation, &learning_context, tone)
            .await?;
        let max_tokens = override_max_tokens.unwrap_or(self.max_tokens);
        let request = ChatRequest::new(messages, system_prompt, max_tokens);

        let (reply, report) = self.failover.execute(request).await;
        info!(
            conversation = %conversation_id,
            provider = %report.provider_used,
            truncated = reply.truncated,
            "AI reply generated"
        );

        self.store
            .append_turn(conversation_id, Role::Assistant, &reply.text, reply.truncated)
            .await?;
        Arc::clone(&self.learning).spawn_note_check(conversation_id.clone());

        Ok(AiReply {
            text: reply.text,
            truncated: reply.truncated,
            provider_used: report.provider_used.clone(),
            report,
        })
    }

    /// Continue a truncated reply by appending a follow-on assistant turn.
    /// The original turn is never mutated.
    pub async fn continue_reply(
        &self,
        conversation_id: &ConversationId,
        tone: Option<ToneDirective>,
    ) -> Result<AiReply, Error> {
        let conversation = self.require_conversation(conversation_id).await?;
        let turns = self.store.list_turns(conversation_id).await?;

        let eligible = turns
            .last()
            .map(|t| t.role == Role::Assistant && t.truncated)
            .unwrap_or(false);
        if !eligible {
            return Err(Error::Internal(
                "continue_reply requires a truncated assistant turn at the end".into(),
            ));
        }

        let window = select_history(&turns, self.max_history_turns);
        let mut messages: Vec<ChatMessage> = window.iter().map(ChatMessage::from_turn).collect();
        messages.push(ChatMessage::user(
            "Continue your previous reply from exactly where it stopped. \
             Do not repeat what you already wrote.",
        ));

        let system_prompt = self.compose_for(&conversation, "", tone).await?;
        let request = ChatRequest::new(messages, system_prompt, self.max_tokens);

        let (reply, report) = self.failover.execute(request).await;
        self.store
            .append_turn(conversation_id, Role::Assistant, &reply.text, reply.truncated)
            .await?;
        Arc::clone(&self.learning).spawn_note_check(conversation_id.clone());

        Ok(AiReply {
            text: reply.text,
            truncated: reply.truncated,
            provider_used: report.provider_used.clone(),
            report,
        })
    }

    async fn require_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Conversation, Error> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                Error::Store(StoreError::NotFound(format!(
                    "conversation {conversation_id}"
                )))
            })
    }

    async fn compose_for(
        &self,
        conversation: &Conversation,
        learning_context: &str,
        tone: Option<ToneDirective>,
    ) -> Result<String, Error> {
        let room = self
            .store
            .get_room(&conversation.room_id)
            .await?
            .ok_or_else(|| {
                Error::Store(StoreError::NotFound(format!("room {}", conversation.room_id)))
            })?;

        let steps = self.store.list_steps(&conversation.room_id).await?;
        let step = steps
            .iter()
            .find(|s| s.key == conversation.step_key)
            .cloned()
            // A refined-away step still has conversations pointing at it;
            // degrade to a bare label rather than failing the reply.
            .unwrap_or_else(|| Step {
                key: conversation.step_key.clone(),
                label: conversation.step_key.clone(),
                instruction: String::new(),
                position: 0,
            });

        let archetype = if self.archetype_prompts_enabled {
            infer_archetype(&step.label, &step.instruction)
        } else {
            Archetype::None
        };
        debug!(
            step = %step.key,
            ?archetype,
            has_context = !learning_context.is_empty(),
            "Composing system prompt"
        );

        let base = base_prompt(&room.goal, &step);
        Ok(compose_system_prompt(&base, archetype, learning_context, tone))
    }
}

/// The base instruction every reply starts from.
fn base_prompt(goal: &str, step: &Step) -> String {
    let mut base = format!(
        "You are an AI learning partner guiding a study room.\n\
         Room goal: {goal}\n\
         Current step: {}",
        step.label
    );
    if !step.instruction.is_empty() {
        base.push_str(&format!("\nStep instruction: {}", step.instruction));
    }
    base.push_str(
        "\nGuide the learner through this step with questions and feedback \
         rather than lectures.",
    );
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::LEARNING_CONTEXT_HEADER;
    use crate::test_support::{fast_controller, memory_store, AlwaysFailing, ScriptedProvider};
    use chrono::Utc;
    use studyloom_core::error::ProviderError;
    use studyloom_core::note::LearningNote;
    use studyloom_core::provider::ChatReply;
    use studyloom_core::room::Step;

    fn steps() -> Vec<Step> {
        vec![
            Step::new(1, "1. Explore the space", "Brainstorm possibilities freely"),
            Step::new(2, "2. Compare approaches", "Contrast the candidates"),
        ]
    }

    async fn engine_with(
        provider: Arc<ScriptedProvider>,
    ) -> (ResponseEngine, Arc<dyn Store>) {
        let store = memory_store().await;
        let failover = fast_controller(vec![provider]);
        let engine = ResponseEngine::new(Arc::clone(&store), failover, &AppConfig::default());
        (engine, store)
    }

    #[tokio::test]
    async fn reply_stored_and_attributed() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (engine, store) = engine_with(provider.clone()).await;

        let room = store.create_room("Learn recursion", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();

        let reply = engine
            .send_message(&conv.id, "where do I start?", None, None)
            .await
            .unwrap();

        assert_eq!(reply.provider_used, "mock");
        assert!(reply.text.contains("where do I start?"));
        assert!(!reply.truncated);

        let turns = store.list_turns(&conv.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn archetype_guidance_reaches_system_prompt() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (engine, store) = engine_with(provider.clone()).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        // step1 says "Explore"/"Brainstorm" → Divergent guidance
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        engine.send_message(&conv.id, "hi", None, None).await.unwrap();

        let prompt = provider.last_system_prompt();
        assert!(prompt.contains("open questions"));
        assert!(prompt.contains("Room goal: goal"));
    }

    #[tokio::test]
    async fn archetypes_can_be_disabled() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let store = memory_store().await;
        let failover = fast_controller(vec![provider.clone()]);
        let config = AppConfig {
            archetype_prompts_enabled: false,
            ..AppConfig::default()
        };
        let engine = ResponseEngine::new(Arc::clone(&store), failover, &config);

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        engine.send_message(&conv.id, "hi", None, None).await.unwrap();

        assert!(!provider.last_system_prompt().contains("open questions"));
    }

    #[tokio::test]
    async fn failover_ordering_reports_secondary() {
        let primary: Arc<dyn studyloom_core::provider::Provider> = Arc::new(AlwaysFailing::new(
            "primary",
            ProviderError::ApiError {
                status_code: 500,
                message: "down".into(),
            },
        ));
        let secondary = Arc::new(ScriptedProvider::new("secondary"));
        let store = memory_store().await;
        let failover = fast_controller(vec![primary, secondary.clone()]);
        let engine = ResponseEngine::new(Arc::clone(&store), failover, &AppConfig::default());

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();

        let reply = engine.send_message(&conv.id, "hello", None, None).await.unwrap();
        assert_eq!(reply.provider_used, "secondary");
        assert!(reply.text.contains("hello"));
        assert_eq!(reply.report.attempts.len(), 2);
    }

    #[tokio::test]
    async fn template_fallback_guarantee() {
        let p1: Arc<dyn studyloom_core::provider::Provider> = Arc::new(AlwaysFailing::new(
            "primary",
            ProviderError::AuthenticationFailed("bad".into()),
        ));
        let p2: Arc<dyn studyloom_core::provider::Provider> = Arc::new(AlwaysFailing::new(
            "secondary",
            ProviderError::QuotaExhausted("billing".into()),
        ));
        let store = memory_store().await;
        let failover = fast_controller(vec![p1, p2]);
        let engine = ResponseEngine::new(Arc::clone(&store), failover, &AppConfig::default());

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();

        let reply = engine
            .send_message(&conv.id, "why is this failing?", None, None)
            .await
            .unwrap();
        assert!(!reply.text.is_empty());
        assert_eq!(reply.provider_used, "template");
    }

    #[tokio::test]
    async fn learning_context_only_on_first_turn() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (engine, store) = engine_with(provider.clone()).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let prior = store.create_conversation(&room.id, "step1").await.unwrap();
        store
            .upsert_note_if_newer(&LearningNote {
                conversation_id: prior.id.clone(),
                text: "learner prefers worked examples".into(),
                message_count: 5,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let conv = store.create_conversation(&room.id, "step2").await.unwrap();

        engine.send_message(&conv.id, "first message", None, None).await.unwrap();
        let first_prompt = provider.last_system_prompt();
        assert!(first_prompt.contains(LEARNING_CONTEXT_HEADER));
        assert!(first_prompt.contains("worked examples"));
        assert!(first_prompt.contains("1. Explore the space"));

        engine.send_message(&conv.id, "second message", None, None).await.unwrap();
        let second_prompt = provider.last_system_prompt();
        assert!(!second_prompt.contains(LEARNING_CONTEXT_HEADER));
    }

    #[tokio::test]
    async fn own_note_never_injected() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (engine, store) = engine_with(provider.clone()).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        store
            .upsert_note_if_newer(&LearningNote {
                conversation_id: conv.id.clone(),
                text: "my own earlier note".into(),
                message_count: 5,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        engine.send_message(&conv.id, "first message", None, None).await.unwrap();
        assert!(!provider.last_system_prompt().contains("my own earlier note"));
    }

    #[tokio::test]
    async fn tone_directive_appended() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (engine, store) = engine_with(provider.clone()).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        engine
            .send_message(&conv.id, "hi", None, Some(ToneDirective::Challenging))
            .await
            .unwrap();

        assert!(provider
            .last_system_prompt()
            .contains(ToneDirective::Challenging.as_instruction()));
    }

    #[tokio::test]
    async fn max_tokens_override_passed_through() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (engine, store) = engine_with(provider.clone()).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        let reply = engine.send_message(&conv.id, "hi", Some(900), None).await.unwrap();
        assert_eq!(reply.provider_used, "mock");
    }

    #[tokio::test]
    async fn continuation_appends_new_turn() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        provider.push_reply(ChatReply {
            text: "first half of a long".into(),
            truncated: true,
        });
        let (engine, store) = engine_with(provider.clone()).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();

        let reply = engine.send_message(&conv.id, "explain fully", None, None).await.unwrap();
        assert!(reply.truncated);

        let continued = engine.continue_reply(&conv.id, None).await.unwrap();
        assert!(!continued.truncated);

        let turns = store.list_turns(&conv.id).await.unwrap();
        assert_eq!(turns.len(), 3);
        // The truncated turn is preserved, not mutated.
        assert!(turns[1].truncated);
        assert_eq!(turns[2].role, Role::Assistant);
        assert!(!turns[2].truncated);
    }

    #[tokio::test]
    async fn continuation_requires_truncated_tail() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (engine, store) = engine_with(provider.clone()).await;

        let room = store.create_room("goal", &steps()).await.unwrap();
        let conv = store.create_conversation(&room.id, "step1").await.unwrap();
        engine.send_message(&conv.id, "hi", None, None).await.unwrap();

        assert!(engine.continue_reply(&conv.id, None).await.is_err());
    }

    #[tokio::test]
    async fn unknown_conversation_is_store_error() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (engine, _store) = engine_with(provider).await;

        let missing = ConversationId::from("nope");
        let result = engine.send_message(&missing, "hi", None, None).await;
        assert!(result.is_err());
    }
}
