//! Turn partitioning and query-based selection of conversation history
//! for multi-topic session token optimization.

use picoclaw_core::{Message, Role};

/// One conversation turn: from a user message up to (but not including)
/// the next user message. `start`/`end` are half-open `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub start: usize,
    pub end: usize,
    /// Concatenated non-empty content of the turn, for scoring.
    pub text: String,
}

/// Split messages into turns. A turn starts at a `role=user` message and
/// ends before the next one; tool chains stay with their assistant
/// message.
pub fn partition_turns(messages: &[Message]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        if messages[i].role != Role::User {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i + 1;
        while end < messages.len() && messages[end].role != Role::User {
            end += 1;
        }
        let text = messages[start..end]
            .iter()
            .filter(|m| !m.content.is_empty())
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        turns.push(Turn { start, end, text });
        i = end;
    }
    turns
}

/// Extract lowercase words (len >= 2) for scoring. Matches the memory
/// store's chunk tokenization.
fn tokenize_for_match(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_ascii_lowercase())
        .filter(|w| w.len() >= 2)
        .map(String::from)
        .collect()
}

/// Score turn text against the query: +10 for a whole-query substring
/// match, +1 per distinct query word present.
fn score_turn(text: &str, query_lower: &str, query_words: &[String]) -> i32 {
    let text_lower = text.to_lowercase();
    let mut score = 0;
    if !query_lower.is_empty() && text_lower.contains(query_lower) {
        score += 10;
    }
    for w in query_words {
        if text_lower.contains(w.as_str()) {
            score += 1;
        }
    }
    score
}

/// Select turns relevant to the query: up to `limit` turns by score,
/// always including the last `fallback_keep` turns. Result is in
/// original order. `limit`/`fallback_keep` of 0 default to 20 and 8.
pub fn select_relevant_turns(
    turns: &[Turn],
    query: &str,
    limit: usize,
    fallback_keep: usize,
) -> Vec<Turn> {
    let query = query.trim();
    let query_lower = query.to_lowercase();
    let query_words = tokenize_for_match(&query_lower);

    let limit = if limit == 0 { 20 } else { limit };
    let fallback_keep = if fallback_keep == 0 { 8 } else { fallback_keep };

    let mut scored: Vec<(usize, i32)> = turns
        .iter()
        .enumerate()
        .map(|(idx, t)| (idx, score_turn(&t.text, &query_lower, &query_words)))
        .collect();

    // Stable: equal scores keep original order.
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let mut selected = vec![false; turns.len()];
    for &(idx, _) in scored.iter().take(limit) {
        selected[idx] = true;
    }
    // Always include the trailing fallback_keep turns.
    let last_n = fallback_keep.min(turns.len());
    for flag in selected.iter_mut().skip(turns.len() - last_n) {
        *flag = true;
    }

    turns
        .iter()
        .zip(&selected)
        .filter(|&(_, &keep)| keep)
        .map(|(t, _)| t.clone())
        .collect()
}

/// The messages belonging to the given turns, in order.
pub fn messages_from_turns(messages: &[Message], turns: &[Turn]) -> Vec<Message> {
    let mut out = Vec::new();
    for t in turns {
        for msg in messages.iter().take(t.end.min(messages.len())).skip(t.start) {
            out.push(msg.clone());
        }
    }
    out
}

/// History subset for context building.
///
/// - `limit` of 0: feature disabled, full history returned unchanged.
/// - `fallback_keep` of 0: no-fallback mode; an empty query or a
///   query with no scoring turn yields an empty history.
/// - Otherwise an empty query (or an unpartitionable history) falls back
///   to the last `fallback_keep` messages.
pub fn get_relevant_history(
    full_history: &[Message],
    query: &str,
    limit: usize,
    fallback_keep: usize,
) -> Vec<Message> {
    if limit == 0 {
        return full_history.to_vec();
    }
    let no_fallback = fallback_keep == 0;

    let turns = partition_turns(full_history);
    if turns.is_empty() {
        if no_fallback {
            return vec![];
        }
        return take_last(full_history, fallback_keep);
    }

    let query = query.trim();
    if query.is_empty() {
        if no_fallback {
            return vec![];
        }
        return take_last(full_history, fallback_keep);
    }

    let mut selected = select_relevant_turns(&turns, query, limit, fallback_keep);
    if no_fallback {
        let query_lower = query.to_lowercase();
        let query_words = tokenize_for_match(&query_lower);
        selected.retain(|t| score_turn(&t.text, &query_lower, &query_words) > 0);
    }
    if selected.is_empty() {
        if no_fallback {
            return vec![];
        }
        return take_last(full_history, fallback_keep);
    }

    messages_from_turns(full_history, &selected)
}

fn take_last(messages: &[Message], n: usize) -> Vec<Message> {
    if n == 0 || n >= messages.len() {
        return messages.to_vec();
    }
    messages[messages.len() - n..].to_vec()
}
