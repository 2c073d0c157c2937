//! History window manager — sliding-window selection over the turn log.
//!
//! Bounds the token cost of long conversations while preserving recency
//! bias: older context is assumed less relevant turn-by-turn and is
//! carried instead by the learning-context notes. A pure windowing
//! function — it never reorders turns and always includes the most
//! recent one; truncation only ever removes from the oldest end.

use studyloom_core::message::Turn;

/// Select the most recent `max_pairs` user+assistant pairs.
///
/// Returns all turns unmodified when the conversation fits within the
/// cap; otherwise the trailing `2 * max_pairs` turns in original order.
pub fn select_history(turns: &[Turn], max_pairs: usize) -> &[Turn] {
    let cap = max_pairs * 2;
    if turns.len() <= cap {
        turns
    } else {
        &turns[turns.len() - cap..]
    }
}
