//! Prompt composer — assembles the final system prompt.
//!
//! Concatenation order is fixed and part of the contract:
//! base → archetype constraint → archetype style → archetype length →
//! learning context → tone directive. Order affects model behavior and
//! must be preserved exactly for reproducibility. Missing inputs degrade
//! to omitting that clause, never to an error.

use crate::archetype::Archetype;
use serde::{Deserialize, Serialize};

/// Static guidance for one archetype: behavioral constraint, prose style,
/// and target length. Configuration data, not computed.
#[derive(Debug, Clone, Copy)]
pub struct ArchetypeGuidance {
    pub constraint: &'static str,
    pub style: &'static str,
    pub length: &'static str,
}

/// Look up the guidance triple for an archetype. `Archetype::None` has no
/// guidance — the prompt is left unenhanced.
pub fn guidance(archetype: Archetype) -> Option<ArchetypeGuidance> {
    let g = match archetype {
        Archetype::Divergent => ArchetypeGuidance {
            constraint: "Ask 2-3 open questions that widen the learner's view. \
                         Do not present conclusions or converge on an answer.",
            style: "Write flowing, curious prose. Avoid numbered lists and verdicts.",
            length: "Aim for 150-200 words.",
        },
        Archetype::Convergent => ArchetypeGuidance {
            constraint: "Help the learner narrow toward a single defensible choice. \
                         Surface the decisive criteria, then ask for their commitment.",
            style: "Be crisp and structured. A short list of criteria is fine.",
            length: "Aim for 150-200 words.",
        },
        Archetype::Analytical => ArchetypeGuidance {
            constraint: "Break the subject into parts and probe causal links. \
                         Ask for evidence behind each claim the learner makes.",
            style: "Write precise, neutral prose. Name assumptions explicitly.",
            length: "Aim for 150-200 words.",
        },
        Archetype::Comparative => ArchetypeGuidance {
            constraint: "Set the alternatives side by side on the same criteria. \
                         Do not declare a winner; let the learner weigh the trade-offs.",
            style: "Use parallel phrasing so the comparison is easy to scan.",
            length: "Aim for 150-200 words.",
        },
        Archetype::Generative => ArchetypeGuidance {
            constraint: "Prompt the learner to produce a concrete artifact — a draft, \
                         sketch, or outline. Respond to what they make, not in their place.",
            style: "Be energetic and encouraging. Offer starting points, not finished work.",
            length: "Aim for 150-200 words.",
        },
        Archetype::Technical => ArchetypeGuidance {
            constraint: "Stay concrete: exact terms, working examples, failure modes. \
                         Correct technical errors directly and explain why.",
            style: "Plain technical prose. Short code or notation where it clarifies.",
            length: "Aim for 150-250 words.",
        },
        Archetype::Predictive => ArchetypeGuidance {
            constraint: "Push the learner to state expected outcomes before revealing \
                         any. Ask what evidence would confirm or refute their forecast.",
            style: "Frame responses as hypotheses and scenarios, not facts.",
            length: "Aim for 150-200 words.",
        },
        Archetype::Metacognitive => ArchetypeGuidance {
            constraint: "Direct attention to the learner's own process: what worked, \
                         what they would change, what they now understand differently.",
            style: "Gentle, reflective prose. Questions over statements.",
            length: "Aim for 120-180 words.",
        },
        Archetype::None => return None,
    };
    Some(g)
}

/// A caller-selected tone directive from a fixed allow-list.
///
/// This is passed as an explicit parameter into response generation —
/// never ambient state — and its text is appended verbatim. Free text is
/// deliberately not representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneDirective {
    Encouraging,
    Neutral,
    Challenging,
}

impl ToneDirective {
    pub fn as_instruction(&self) -> &'static str {
        match self {
            Self::Encouraging => {
                "Adopt an encouraging tone: highlight what the learner did well before \
                 addressing gaps."
            }
            Self::Neutral => "Adopt a neutral, even-handed tone.",
            Self::Challenging => {
                "Adopt a challenging tone: press on weak points and ask the learner to \
                 defend their reasoning."
            }
        }
    }
}

/// The label introducing injected cross-conversation context.
pub const LEARNING_CONTEXT_HEADER: &str = "LEARNING CONTEXT FROM PREVIOUS DISCUSSIONS:";

/// Assemble the final system prompt.
pub fn compose_system_prompt(
    base_prompt: &str,
    archetype: Archetype,
    learning_context: &str,
    tone: Option<ToneDirective>,
) -> String {
    let mut sections: Vec<String> = vec![base_prompt.to_string()];

    if let Some(g) = guidance(archetype) {
        sections.push(g.constraint.to_string());
        sections.push(g.style.to_string());
        sections.push(g.length.to_string());
    }

    if !learning_context.is_empty() {
        sections.push(format!("{LEARNING_CONTEXT_HEADER}\n{learning_context}"));
    }

    if let Some(tone) = tone {
        sections.push(tone.as_instruction().to_string());
    }

    sections.join("\n\n")
}
