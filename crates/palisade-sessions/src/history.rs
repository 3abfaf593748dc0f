//! Token-bounded history selection for model input.
//!
//! The store holds full turns; models get a budgeted window. Truncation
//! drops oldest-first, keeps user/assistant alternation valid (the window
//! must open on a user turn), and never drops the current user message —
//! that one is appended by the generator after this window is built.

use crate::types::{Turn, TurnRole};

/// Rough chars-per-token ratio for English prose. The budget is a guard
/// rail, not an exact accountant — erring low is fine, erring high is not.
const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Total estimated tokens across a set of turns.
pub fn estimate_turns(turns: &[Turn]) -> usize {
    turns.iter().map(|t| estimate_tokens(&t.content)).sum()
}

/// Select the suffix of `turns` that fits `max_tokens`, preserving
/// alternation. Returns owned clones — the caller is building a prompt,
/// not mutating the conversation.
pub fn bounded_window(turns: &[Turn], max_tokens: usize) -> Vec<Turn> {
    // Walk backwards accumulating until the budget is spent.
    let mut start = turns.len();
    let mut used = 0usize;
    for (i, turn) in turns.iter().enumerate().rev() {
        let cost = estimate_tokens(&turn.content);
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        start = i;
    }

    // Alternation: the window must open with a user turn so the
    // user/assistant rhythm the model sees stays valid.
    while start < turns.len() && turns[start].role != TurnRole::User {
        start += 1;
    }

    turns[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: TurnRole, content: &str) -> Turn {
        match role {
            TurnRole::User => Turn::user(content),
            TurnRole::Assistant => {
                Turn::assistant(content, palisade_core::types::Domain::Meta, 0)
            }
        }
    }

    #[test]
    fn empty_history_yields_empty_window() {
        assert!(bounded_window(&[], 100).is_empty());
    }

    #[test]
    fn full_history_fits_under_large_budget() {
        let turns = vec![
            turn(TurnRole::User, "hi"),
            turn(TurnRole::Assistant, "hello"),
            turn(TurnRole::User, "what projects?"),
            turn(TurnRole::Assistant, "several"),
        ];
        let window = bounded_window(&turns, 10_000);
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn oldest_turns_are_dropped_first() {
        let turns = vec![
            turn(TurnRole::User, &"a".repeat(400)), // ~100 tokens
            turn(TurnRole::Assistant, &"b".repeat(400)),
            turn(TurnRole::User, &"c".repeat(400)),
            turn(TurnRole::Assistant, &"d".repeat(400)),
        ];
        // Budget for roughly two turns.
        let window = bounded_window(&turns, 220);
        assert_eq!(window.len(), 2);
        assert!(window[0].content.starts_with('c'));
    }

    #[test]
    fn window_always_opens_on_a_user_turn() {
        let turns = vec![
            turn(TurnRole::User, &"a".repeat(400)),
            turn(TurnRole::Assistant, &"b".repeat(40)),
            turn(TurnRole::User, &"c".repeat(40)),
            turn(TurnRole::Assistant, &"d".repeat(40)),
        ];
        // Budget excludes the first user turn but would admit the trailing
        // assistant run — the leading assistant turn must then be dropped.
        let window = bounded_window(&turns, 40);
        assert!(!window.is_empty());
        assert_eq!(window[0].role, TurnRole::User);
    }

    #[test]
    fn window_never_exceeds_budget() {
        let turns: Vec<Turn> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    turn(TurnRole::User, &"x".repeat(200))
                } else {
                    turn(TurnRole::Assistant, &"y".repeat(200))
                }
            })
            .collect();
        for budget in [0, 50, 100, 500, 2000] {
            let window = bounded_window(&turns, budget);
            assert!(estimate_turns(&window) <= budget);
        }
    }
}
