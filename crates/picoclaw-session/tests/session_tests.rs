use picoclaw_core::{Message, Role, ToolCall};
use picoclaw_session::{get_relevant_history, partition_turns, select_relevant_turns};

fn user(text: &str) -> Message {
    Message::text(Role::User, text)
}

fn assistant(text: &str) -> Message {
    Message::text(Role::Assistant, text)
}

/// Three-turn history on distinct topics: dogs, cats, weather.
fn three_topic_history() -> Vec<Message> {
    vec![
        user("tell me about dogs"),
        assistant("dogs are loyal"),
        user("now cats please"),
        assistant("cats are independent"),
        user("what's the weather"),
        assistant("sunny today"),
    ]
}

// ── Partitioning ───────────────────────────────────────────────

#[test]
fn test_partition_covers_every_user_index_disjointly() {
    let history = three_topic_history();
    let turns = partition_turns(&history);
    assert_eq!(turns.len(), 3);

    // Ranges are disjoint, in order, and start at each user index.
    let user_indices: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .collect();
    let starts: Vec<usize> = turns.iter().map(|t| t.start).collect();
    assert_eq!(starts, user_indices);
    for pair in turns.windows(2) {
        assert!(pair[0].end <= pair[1].start);
    }
}

#[test]
fn test_partition_keeps_tool_chain_in_turn() {
    let messages = vec![
        user("run it"),
        Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "exec".into(),
                arguments: serde_json::json!({}),
            }],
        ),
        Message::tool_result("c1", "done"),
        assistant("finished"),
        user("thanks"),
    ];
    let turns = partition_turns(&messages);
    assert_eq!(turns.len(), 2);
    assert_eq!((turns[0].start, turns[0].end), (0, 4));
    assert_eq!((turns[1].start, turns[1].end), (4, 5));
    assert_eq!(turns[0].text, "run it done finished");
}

#[test]
fn test_partition_skips_leading_non_user() {
    let messages = vec![assistant("hello there"), user("hi")];
    let turns = partition_turns(&messages);
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].start, 1);
}

#[test]
fn test_partition_empty() {
    assert!(partition_turns(&[]).is_empty());
}

// ── Selection ──────────────────────────────────────────────────

#[test]
fn test_select_relevant_with_fallback_keeps_last_turn() {
    let history = three_topic_history();
    let turns = partition_turns(&history);
    let selected = select_relevant_turns(&turns, "dogs", 1, 1);
    // The dogs turn (by score) plus the weather turn (fallback), original order.
    assert_eq!(selected.len(), 2);
    assert!(selected[0].text.contains("dogs"));
    assert!(selected[1].text.contains("weather"));
}

#[test]
fn test_select_ties_keep_original_order() {
    let turns = partition_turns(&[
        user("same topic alpha"),
        user("same topic beta"),
        user("same topic gamma"),
    ]);
    let selected = select_relevant_turns(&turns, "topic", 3, 1);
    assert_eq!(selected.len(), 3);
    assert!(selected[0].text.contains("alpha"));
    assert!(selected[1].text.contains("beta"));
    assert!(selected[2].text.contains("gamma"));
}

// ── GetRelevantHistory ─────────────────────────────────────────

#[test]
fn test_limit_zero_returns_full_history() {
    let history = three_topic_history();
    let out = get_relevant_history(&history, "dogs", 0, 1);
    assert_eq!(out.len(), history.len());
}

#[test]
fn test_query_match_plus_fallback_in_original_order() {
    let history = three_topic_history();
    let out = get_relevant_history(&history, "dogs", 5, 1);
    let texts: Vec<&str> = out.iter().map(|m| m.content.as_str()).collect();
    // Both the dogs turn and the trailing weather turn survive, in order.
    assert!(texts.contains(&"tell me about dogs"));
    assert!(texts.contains(&"what's the weather"));
    assert!(texts.contains(&"sunny today"));
    let dogs_pos = texts.iter().position(|t| t.contains("dogs")).unwrap();
    let weather_pos = texts.iter().position(|t| t.contains("weather")).unwrap();
    assert!(dogs_pos < weather_pos);
}

#[test]
fn test_empty_query_with_fallback_takes_last_messages() {
    let history = three_topic_history();
    let out = get_relevant_history(&history, "", 5, 2);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].content, "what's the weather");
    assert_eq!(out[1].content, "sunny today");
}

#[test]
fn test_empty_query_no_fallback_is_empty() {
    let history = three_topic_history();
    let out = get_relevant_history(&history, "", 5, 0);
    assert!(out.is_empty());
}

#[test]
fn test_no_match_no_fallback_is_empty() {
    let history = three_topic_history();
    let out = get_relevant_history(&history, "zzzz qqqq", 5, 0);
    assert!(out.is_empty());
}

#[test]
fn test_no_match_with_fallback_takes_last_messages() {
    let history = three_topic_history();
    let out = get_relevant_history(&history, "zzzz qqqq", 5, 3);
    assert_eq!(out.len(), 3);
    assert_eq!(out[2].content, "sunny today");
}

#[test]
fn test_fallback_longer_than_history_returns_all() {
    let history = vec![user("only message")];
    let out = get_relevant_history(&history, "", 5, 10);
    assert_eq!(out.len(), 1);
}

#[test]
fn test_no_turns_with_fallback() {
    // History with no user message cannot be partitioned.
    let history = vec![assistant("a"), assistant("b"), assistant("c")];
    let out = get_relevant_history(&history, "anything", 5, 2);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].content, "b");
}
