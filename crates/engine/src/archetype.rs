//! Archetype classifier — infers a cognitive-style label from step metadata.
//!
//! The classifier concatenates step label and instruction, lowercases the
//! result, and tests it against an **ordered** list of (archetype,
//! keyword-set) pairs. The first archetype whose keyword set matches wins —
//! order is the tie-break and is part of the contract. An unmatched input
//! classifies as `Archetype::None` (no prompt enhancement), which is a
//! normal outcome, not an error.

use serde::{Deserialize, Serialize};

/// A derived cognitive-style label. Computed per request from step text,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Archetype {
    Divergent,
    Convergent,
    Analytical,
    Comparative,
    Generative,
    Technical,
    Predictive,
    Metacognitive,
    None,
}

/// The fixed priority list. Keywords are matched as lowercase substrings,
/// so stems ("possibilit") cover morphological variants. Earlier entries
/// win ties — e.g. a step mentioning both "explore" and "compare"
/// classifies as Divergent.
const KEYWORD_PRIORITY: &[(Archetype, &[&str])] = &[
    (
        Archetype::Divergent,
        &[
            "explore",
            "brainstorm",
            "imagine",
            "possibilit",
            "alternativ",
            "open-ended",
            "wonder",
            "generate ideas",
        ],
    ),
    (
        Archetype::Convergent,
        &[
            "decide",
            "choose",
            "conclu",
            "narrow",
            "select",
            "prioriti",
            "settle on",
            "commit to",
        ],
    ),
    (
        Archetype::Analytical,
        &[
            "analy",
            "examine",
            "break down",
            "dissect",
            "underlying cause",
            "evidence",
            "reason through",
        ],
    ),
    (
        Archetype::Comparative,
        &[
            "compare",
            "contrast",
            "versus",
            "difference",
            "similarit",
            "trade-off",
            "weigh",
        ],
    ),
    (
        Archetype::Generative,
        &[
            "create",
            "design",
            "build",
            "draft",
            "compose",
            "invent",
            "sketch",
            "produce",
        ],
    ),
    (
        Archetype::Technical,
        &[
            "implement",
            "code",
            "algorithm",
            "debug",
            "technical",
            "syntax",
            "configure",
        ],
    ),
    (
        Archetype::Predictive,
        &[
            "predict",
            "forecast",
            "anticipate",
            "what if",
            "outcome",
            "extrapolate",
        ],
    ),
    (
        Archetype::Metacognitive,
        &[
            "reflect",
            "metacogniti",
            "your learning",
            "your own thinking",
            "self-assess",
            "look back",
            "strategy you used",
        ],
    ),
];

/// Infer the archetype for a step from its label and instruction.
///
/// Pure and deterministic: identical inputs always yield the same label.
pub fn infer_archetype(step_label: &str, step_instruction: &str) -> Archetype {
    let text = format!("{step_label} {step_instruction}").to_lowercase();

    for (archetype, keywords) in KEYWORD_PRIORITY {
        if keywords.iter().any(|kw| text.contains(kw)) {
            return *archetype;
        }
    }

    Archetype::None
}
