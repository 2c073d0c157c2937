//! Room step refinement — a two-stage rewrite of a room's learning steps.
//!
//! Stage one is a deterministic pre-pass for simple known preference forms
//! ("reduce to N steps", "remove step K") applied without a model call.
//! Stage two asks the failover chain for a constrained JSON rewrite.
//! Either path's output passes the same validation before persisting:
//! step count within 1..=12, keys renumbered strictly sequentially,
//! labels normalized to start with their ordinal, prompts stripped of
//! markup and length-capped. Validation failure leaves the previous step
//! set intact — a refinement is never partially applied.

use serde::Deserialize;
use std::sync::Arc;
use studyloom_core::error::{Error, RefineError};
use studyloom_core::message::{ChatMessage, RoomId};
use studyloom_core::provider::ChatRequest;
use studyloom_core::room::{NewRefinement, RefinementRecord, Step};
use studyloom_core::store::Store;
use studyloom_providers::FailoverController;
use tracing::{info, warn};

const MAX_STEPS: usize = 12;
const MAX_INSTRUCTION_CHARS: usize = 600;
const REFINE_MAX_TOKENS: u32 = 1200;

const REFINE_SYSTEM_PROMPT: &str =
    "You revise the ordered learning steps of a study room according to the \
     user's preference. Reply with strict JSON only, no prose and no code \
     fences, in this shape: \
     {\"modes\": [{\"key\": \"step1\", \"label\": \"1. ...\", \"prompt\": \"...\"}], \
     \"summary\": \"one sentence describing the change\", \"notes\": null}. \
     Between 1 and 12 steps. Keep steps the user did not ask to change.";

/// The strict JSON contract for model-assisted rewrites.
#[derive(Debug, Deserialize)]
struct RefineResponse {
    modes: Vec<ModeSpec>,
    summary: String,
    #[serde(default)]
    #[allow(dead_code)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModeSpec {
    #[allow(dead_code)]
    key: String,
    label: String,
    prompt: String,
}

/// Applies refinements and step generation for rooms.
pub struct StepRefiner {
    store: Arc<dyn Store>,
    failover: Arc<FailoverController>,
}

impl StepRefiner {
    pub fn new(store: Arc<dyn Store>, failover: Arc<FailoverController>) -> Self {
        Self { store, failover }
    }

    /// Refine a room's steps according to a free-text preference.
    ///
    /// On success the step replacement and its history record are
    /// committed atomically and the record is returned. On any failure
    /// the room's previous steps are untouched.
    pub async fn refine_steps(
        &self,
        room: &RoomId,
        preference_text: &str,
    ) -> Result<RefinementRecord, Error> {
        let current = self.store.list_steps(room).await?;

        let (candidate, summary) = match deterministic_pass(preference_text, &current) {
            Some((steps, summary)) => {
                info!(room = %room, "Refinement resolved by deterministic pre-pass");
                (steps, summary)
            }
            None => self.model_rewrite(preference_text, &current).await?,
        };

        let validated = validate_steps(candidate)?;

        let record = self
            .store
            .replace_steps_with_history(
                room,
                NewRefinement {
                    preference_text: preference_text.to_string(),
                    new_steps: validated,
                    summary,
                },
            )
            .await?;

        info!(room = %room, refinement = %record.id, "Steps refined");
        Ok(record)
    }

    /// Restore the steps a refinement replaced. The revert itself is
    /// recorded as a new history entry.
    pub async fn revert_refinement(
        &self,
        room: &RoomId,
        record_id: &str,
    ) -> Result<RefinementRecord, Error> {
        let record = self
            .store
            .get_refinement(record_id)
            .await?
            .ok_or_else(|| {
                Error::Refine(RefineError::MalformedResponse(format!(
                    "no refinement record '{record_id}'"
                )))
            })?;

        let restored = validate_steps(
            record
                .old_steps
                .iter()
                .map(|s| (s.label.clone(), s.instruction.clone()))
                .collect(),
        )?;

        let new_record = self
            .store
            .replace_steps_with_history(
                room,
                NewRefinement {
                    preference_text: format!("revert refinement {record_id}"),
                    new_steps: restored,
                    summary: format!("Reverted to the steps before refinement {record_id}"),
                },
            )
            .await?;

        Ok(new_record)
    }

    /// Generate an initial step list for a new room from its goal.
    ///
    /// Falls back to a deterministic three-step default when the network
    /// chain is exhausted or returns something unusable.
    pub async fn generate_steps(&self, goal: &str) -> Vec<Step> {
        let request = ChatRequest::new(
            vec![ChatMessage::user(format!(
                "Create learning steps for this goal: {goal}"
            ))],
            REFINE_SYSTEM_PROMPT,
            REFINE_MAX_TOKENS,
        );

        match self.try_model_steps(request).await {
            Ok(steps) => steps,
            Err(error) => {
                warn!(%error, "Step generation failed, using default steps");
                default_steps()
            }
        }
    }

    async fn try_model_steps(&self, request: ChatRequest) -> Result<Vec<Step>, Error> {
        let (reply, _report) = self.failover.execute_network(request).await.map_err(Error::from)?;
        let parsed = parse_refine_response(&reply.text)?;
        let candidate = parsed
            .modes
            .into_iter()
            .map(|m| (m.label, m.prompt))
            .collect();
        Ok(validate_steps(candidate)?)
    }

    async fn model_rewrite(
        &self,
        preference_text: &str,
        current: &[Step],
    ) -> Result<(Vec<(String, String)>, String), Error> {
        let current_json = serde_json::to_string_pretty(current)?;
        let request = ChatRequest::new(
            vec![ChatMessage::user(format!(
                "Current steps:\n{current_json}\n\nUser preference: {preference_text}"
            ))],
            REFINE_SYSTEM_PROMPT,
            REFINE_MAX_TOKENS,
        );

        let (reply, report) = self.failover.execute_network(request).await.map_err(Error::from)?;
        info!(provider = %report.provider_used, "Model-assisted refinement reply received");

        let parsed = parse_refine_response(&reply.text)?;
        let candidate = parsed
            .modes
            .into_iter()
            .map(|m| (m.label, m.prompt))
            .collect();
        Ok((candidate, parsed.summary))
    }
}

/// Pattern-match simple preference forms; `None` falls through to the
/// model path. Matching is case-insensitive and word based.
fn deterministic_pass(
    preference_text: &str,
    current: &[Step],
) -> Option<(Vec<(String, String)>, String)> {
    let lowered = preference_text.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    // "reduce to N steps"
    for window in words.windows(3) {
        if window[0] == "reduce" && window[1] == "to" {
            if let Ok(n) = window[2].parse::<usize>() {
                if n >= 1 && n < current.len() {
                    let kept = current
                        .iter()
                        .take(n)
                        .map(|s| (s.label.clone(), s.instruction.clone()))
                        .collect();
                    return Some((kept, format!("Reduced from {} to {n} steps", current.len())));
                }
            }
        }
    }

    // "remove step K"
    for window in words.windows(3) {
        if window[0] == "remove" && window[1] == "step" {
            if let Ok(k) = window[2].parse::<usize>() {
                if k >= 1 && k <= current.len() && current.len() > 1 {
                    let kept = current
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| i + 1 != k)
                        .map(|(_, s)| (s.label.clone(), s.instruction.clone()))
                        .collect();
                    return Some((kept, format!("Removed step {k}")));
                }
            }
        }
    }

    None
}

/// Extract and parse the JSON payload from a model reply, tolerating code
/// fences and surrounding prose.
fn parse_refine_response(text: &str) -> Result<RefineResponse, RefineError> {
    let start = text
        .find('{')
        .ok_or_else(|| RefineError::MalformedResponse("no JSON object in reply".into()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| RefineError::MalformedResponse("unterminated JSON object".into()))?;
    if end < start {
        return Err(RefineError::MalformedResponse("unterminated JSON object".into()));
    }

    serde_json::from_str(&text[start..=end])
        .map_err(|e| RefineError::MalformedResponse(e.to_string()))
}

/// Validate and normalize a candidate step list.
///
/// Keys are renumbered strictly sequentially regardless of what the model
/// returned; labels are normalized to start with their ordinal; prompt
/// text is stripped of markup and length-capped.
fn validate_steps(candidate: Vec<(String, String)>) -> Result<Vec<Step>, RefineError> {
    let count = candidate.len();
    if count == 0 || count > MAX_STEPS {
        return Err(RefineError::InvalidStepCount { count });
    }

    let steps = candidate
        .into_iter()
        .enumerate()
        .map(|(i, (label, instruction))| {
            let position = (i + 1) as i64;
            Step {
                key: format!("step{position}"),
                label: normalize_label(&label, position),
                instruction: sanitize_instruction(&instruction),
                position,
            }
        })
        .collect();

    Ok(steps)
}

/// Ensure a label starts with its ordinal ("3. ..."), replacing any stale
/// numbering the model carried over.
fn normalize_label(label: &str, position: i64) -> String {
    let stripped = label
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['.', ')', ':'])
        .trim_start();
    if stripped.is_empty() {
        format!("{position}. Step {position}")
    } else {
        format!("{position}. {stripped}")
    }
}

/// Strip markup characters and cap instruction length.
fn sanitize_instruction(instruction: &str) -> String {
    let cleaned: String = instruction
        .chars()
        .filter(|c| !matches!(c, '*' | '#' | '`' | '>' | '_'))
        .collect();
    let trimmed = cleaned.trim();
    trimmed.chars().take(MAX_INSTRUCTION_CHARS).collect()
}

/// Deterministic default used when step generation has no model output.
pub fn default_steps() -> Vec<Step> {
    vec![
        Step::new(
            1,
            "1. Explore the topic",
            "Survey the territory: what do you already know, and what looks unfamiliar?",
        ),
        Step::new(
            2,
            "2. Analyze the core ideas",
            "Break the central concepts down and examine how they connect.",
        ),
        Step::new(
            3,
            "3. Apply and conclude",
            "Put the ideas to work on a concrete example and decide what you take away.",
        ),
    ]
}

#[cfg(test)]
mod flow_tests {
    use super::*;
    use crate::test_support::{fast_controller, memory_store, AlwaysFailing, ScriptedProvider};
    use studyloom_core::error::ProviderError;
    use studyloom_core::provider::{ChatReply, Provider};

    fn seed_steps() -> Vec<Step> {
        vec![
            Step::new(1, "1. Explore", "Brainstorm widely"),
            Step::new(2, "2. Analyze", "Break it down"),
            Step::new(3, "3. Decide", "Choose one approach"),
        ]
    }

    async fn refiner_with(
        provider: Arc<ScriptedProvider>,
    ) -> (StepRefiner, Arc<dyn Store>) {
        let store = memory_store().await;
        let failover = fast_controller(vec![provider]);
        (StepRefiner::new(Arc::clone(&store), failover), store)
    }

    #[tokio::test]
    async fn deterministic_reduce_skips_model() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (refiner, store) = refiner_with(provider.clone()).await;

        let room = store.create_room("goal", &seed_steps()).await.unwrap();
        let record = refiner.refine_steps(&room.id, "reduce to 2 steps").await.unwrap();

        assert_eq!(record.new_steps.len(), 2);
        assert_eq!(provider.calls(), 0);

        let steps = store.list_steps(&room.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].key, "step2");
    }

    #[tokio::test]
    async fn model_path_applies_validated_rewrite() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        provider.push_reply(ChatReply::full(
            r#"{"modes": [
                {"key": "step1", "label": "1. Survey", "prompt": "Look around"},
                {"key": "step5", "label": "5. Commit", "prompt": "Pick one"}
            ], "summary": "two practical steps"}"#,
        ));
        let (refiner, store) = refiner_with(provider.clone()).await;

        let room = store.create_room("goal", &seed_steps()).await.unwrap();
        let record = refiner
            .refine_steps(&room.id, "make the steps more practical")
            .await
            .unwrap();

        assert_eq!(record.summary, "two practical steps");
        let steps = store.list_steps(&room.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].key, "step2");
        assert_eq!(steps[1].label, "2. Commit");
    }

    #[tokio::test]
    async fn malformed_model_output_leaves_steps_intact() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        provider.push_reply(ChatReply::full("I would restructure everything entirely."));
        let (refiner, store) = refiner_with(provider.clone()).await;

        let room = store.create_room("goal", &seed_steps()).await.unwrap();
        let result = refiner.refine_steps(&room.id, "something vague").await;
        assert!(result.is_err());

        let steps = store.list_steps(&room.id).await.unwrap();
        assert_eq!(steps, seed_steps());
        assert!(store.list_refinements(&room.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revert_restores_previous_steps() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        let (refiner, store) = refiner_with(provider.clone()).await;

        let room = store.create_room("goal", &seed_steps()).await.unwrap();
        let record = refiner.refine_steps(&room.id, "reduce to 1 steps").await.unwrap();
        assert_eq!(store.list_steps(&room.id).await.unwrap().len(), 1);

        refiner.revert_refinement(&room.id, &record.id).await.unwrap();
        let restored = store.list_steps(&room.id).await.unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored[2].label, "3. Decide");

        // The revert itself is history too.
        assert_eq!(store.list_refinements(&room.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn generate_steps_falls_back_to_defaults() {
        let failing: Arc<dyn Provider> = Arc::new(AlwaysFailing::new(
            "down",
            ProviderError::AuthenticationFailed("bad".into()),
        ));
        let store = memory_store().await;
        let refiner = StepRefiner::new(Arc::clone(&store), fast_controller(vec![failing]));

        let generated = refiner.generate_steps("learn anything").await;
        assert_eq!(generated, default_steps());
    }

    #[tokio::test]
    async fn generate_steps_uses_model_when_available() {
        let provider = Arc::new(ScriptedProvider::new("mock"));
        provider.push_reply(ChatReply::full(
            r#"{"modes": [
                {"key": "step1", "label": "1. Read", "prompt": "Read the chapter"},
                {"key": "step2", "label": "2. Practice", "prompt": "Do the exercises"}
            ], "summary": "reading plan"}"#,
        ));
        let store = memory_store().await;
        let refiner = StepRefiner::new(Arc::clone(&store), fast_controller(vec![provider]));

        let generated = refiner.generate_steps("learn the chapter").await;
        assert_eq!(generated.len(), 2);
        assert_eq!(generated[0].label, "1. Read");
    }
}
