//! Token estimation utilities.
//!
//! Uses a word-based heuristic: ~1.33 tokens per word (words / 0.75),
//! rounded up. This exists only to support a soft budget, not
//! billing-accurate accounting — callers must not assume exactness.

use studyloom_core::message::Turn;

/// Estimate the token count for a string.
///
/// Heuristic: `ceil(words / 0.75)`. Pure, no failure mode.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    if words == 0 {
        return 0;
    }
    // words / 0.75 == words * 4 / 3, rounded up
    (words * 4).div_ceil(3)
}

/// Estimate tokens for a single turn including per-message overhead.
///
/// Each message costs a few tokens of overhead for role name and
/// delimiters in the API wire format.
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(&turn.text)
}

/// Estimate tokens for a slice of turns.
pub fn estimate_turns_tokens(turns: &[Turn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use studyloom_core::message::Role;

    fn turn(text: &str) -> Turn {
        Turn {
            index: 0,
            role: Role::User,
            text: text.into(),
            created_at: Utc::now(),
            truncated: false,
        }
    }

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
    }

    #[test]
    fn three_words_is_four_tokens() {
        assert_eq!(estimate_tokens("one two three"), 4);
    }

    #[test]
    fn single_word_rounds_up() {
        // 1 / 0.75 = 1.33 → 2
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn seventy_five_words() {
        let text = vec!["word"; 75].join(" ");
        assert_eq!(estimate_tokens(&text), 100);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(estimate_tokens(text), estimate_tokens(text));
    }

    #[test]
    fn turn_includes_overhead() {
        // 3 words → 4 tokens + 4 overhead = 8
        assert_eq!(estimate_turn_tokens(&turn("one two three")), 8);
    }

    #[test]
    fn multiple_turns_sum() {
        let turns = vec![turn("one two three"), turn("four five six")];
        assert_eq!(estimate_turns_tokens(&turns), 16);
    }
}
