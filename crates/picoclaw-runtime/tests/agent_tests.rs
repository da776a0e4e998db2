use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

use picoclaw_config::PicoConfig;
use picoclaw_core::{Role, Tool};
use picoclaw_hooks::{Dispatcher, Event, Handler, HookContext, HookResult};
use picoclaw_llm::MockProvider;
use picoclaw_memory::MemoryStore;
use picoclaw_runtime::AgentLoop;
use picoclaw_runtime::tools::WriteFileTool;
use picoclaw_session::SessionManager;

/// Records every event it sees, with the tool name for tool events.
struct RecordingHandler {
    seen: Arc<Mutex<Vec<(Event, String)>>>,
}

impl Handler for RecordingHandler {
    fn name(&self) -> &str {
        "recorder"
    }
    fn handle(&self, event: Event, ctx: &HookContext) -> HookResult {
        self.seen.lock().push((event, ctx.tool_name.clone()));
        HookResult::ok("recorded")
    }
}

fn recording_dispatcher() -> (Arc<Dispatcher>, Arc<Mutex<Vec<(Event, String)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Arc::new(Dispatcher::new(None));
    for event in picoclaw_hooks::types::KNOWN_EVENTS {
        dispatcher.register(event, Arc::new(RecordingHandler { seen: seen.clone() }));
    }
    (dispatcher, seen)
}

fn config(workspace: &TempDir, fallbacks: &[&str]) -> PicoConfig {
    let mut config = PicoConfig::default();
    config.agent.workspace = workspace.path().to_path_buf();
    config.agent.model = "mock/primary".into();
    config.agent.model_fallbacks = fallbacks.iter().map(|s| s.to_string()).collect();
    config.agent.max_tool_iterations = 5;
    config
}

fn agent(config: &PicoConfig, provider: MockProvider, hooks: Arc<Dispatcher>) -> Arc<AgentLoop> {
    Arc::new(AgentLoop::new(config, Arc::new(provider), hooks))
}

// ── Plain turns ────────────────────────────────────────────────

#[tokio::test]
async fn test_simple_turn_returns_content_and_persists() {
    let ws = TempDir::new().unwrap();
    let (hooks, _seen) = recording_dispatcher();
    let provider = MockProvider::new("mock").with_response("Hello there!");
    let agent = agent(&config(&ws, &[]), provider, hooks);

    let reply = agent.process_direct("Hi", "openai:alice", None).await.unwrap();
    assert_eq!(reply, "Hello there!");

    let sessions = SessionManager::new(&ws.path().join("sessions"));
    let session = sessions.get_or_create("openai:alice");
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[0].role, Role::User);
    assert_eq!(session.messages[1].role, Role::Assistant);
    assert_eq!(session.messages[1].content, "Hello there!");
}

#[tokio::test]
async fn test_system_prompt_carries_session_footer_and_user_message() {
    let ws = TempDir::new().unwrap();
    let (hooks, _seen) = recording_dispatcher();
    let provider = MockProvider::new("mock").with_response("ok");
    let requests = provider.requests.clone();
    let agent = agent(&config(&ws, &[]), provider, hooks);

    agent.process_direct("Hello", "openai:alice", None).await.unwrap();

    let requests = requests.lock();
    let messages = &requests[0].messages;
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.contains("## Current Session"));
    assert!(messages[0].content.contains("Channel: openai"));
    assert!(messages[0].content.contains("Chat ID: alice"));
    assert_eq!(messages.last().unwrap().role, Role::User);
    assert_eq!(messages.last().unwrap().content, "Hello");
}

// ── Tool loop ──────────────────────────────────────────────────

#[tokio::test]
async fn test_tool_call_roundtrip() {
    let ws = TempDir::new().unwrap();
    let (hooks, seen) = recording_dispatcher();
    let provider = MockProvider::new("mock")
        .with_tool_call(
            "memory_append",
            serde_json::json!({"content": "User likes tea"}),
        )
        .with_response("Noted!");
    let agent = agent(&config(&ws, &[]), provider, hooks);

    let reply = agent.process_direct("remember I like tea", "openai:bob", None).await.unwrap();
    assert_eq!(reply, "Noted!");

    // The tool actually ran
    let memory = MemoryStore::new(ws.path());
    assert!(memory.read_long_term().contains("User likes tea"));

    // Session history: user, assistant+tool_calls, tool result, assistant
    let sessions = SessionManager::new(&ws.path().join("sessions"));
    let session = sessions.get_or_create("openai:bob");
    let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert!(!session.messages[1].tool_calls.is_empty());
    assert!(session.messages[2].tool_call_id.is_some());

    // Event ordering within the turn
    let events: Vec<Event> = seen.lock().iter().map(|(e, _)| *e).collect();
    assert_eq!(
        events,
        vec![
            Event::BeforeTurn,
            Event::BeforeLlm,
            Event::AfterLlm,
            Event::BeforeTool,
            Event::AfterTool,
            Event::BeforeLlm,
            Event::AfterLlm,
            Event::AfterTurn,
        ]
    );
}

#[tokio::test]
async fn test_unknown_tool_yields_error_result_and_on_error() {
    let ws = TempDir::new().unwrap();
    let (hooks, seen) = recording_dispatcher();
    let provider = MockProvider::new("mock")
        .with_tool_call("no_such_tool", serde_json::json!({}))
        .with_response("recovered");
    let agent = agent(&config(&ws, &[]), provider, hooks);

    let reply = agent.process_direct("try it", "openai:c", None).await.unwrap();
    assert_eq!(reply, "recovered", "tool failure must not abort the turn");

    let events: Vec<Event> = seen.lock().iter().map(|(e, _)| *e).collect();
    assert!(events.contains(&Event::OnError));

    let sessions = SessionManager::new(&ws.path().join("sessions"));
    let session = sessions.get_or_create("openai:c");
    let tool_msg = session.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.content.contains("tool not found"));
}

#[tokio::test]
async fn test_iteration_budget_returns_last_content() {
    let ws = TempDir::new().unwrap();
    let (hooks, seen) = recording_dispatcher();
    // Every response asks for another tool call; the budget (5) runs out.
    let mut provider = MockProvider::new("mock");
    for _ in 0..6 {
        provider = provider.with_tool_call("list_dir", serde_json::json!({"path": "."}));
    }
    let agent = agent(&config(&ws, &[]), provider, hooks);

    let reply = agent.process_direct("loop forever", "openai:d", None).await.unwrap();
    assert_eq!(reply, "");

    let events: Vec<Event> = seen.lock().iter().map(|(e, _)| *e).collect();
    assert_eq!(events.iter().filter(|e| **e == Event::BeforeLlm).count(), 5);
    assert_eq!(*events.last().unwrap(), Event::AfterTurn);
}

#[tokio::test]
async fn test_elapsed_deadline_ends_turn_before_model_call() {
    let ws = TempDir::new().unwrap();
    let (hooks, seen) = recording_dispatcher();
    let provider = MockProvider::new("mock").with_response("never reached");
    let requests = provider.requests.clone();
    let agent = agent(&config(&ws, &[]), provider, hooks);

    let reply = agent
        .process_direct("hi", "openai:late", Some(Instant::now()))
        .await
        .unwrap();
    assert_eq!(reply, "");
    assert!(requests.lock().is_empty(), "no model call past the deadline");

    // The turn still opens and closes cleanly.
    let events: Vec<Event> = seen.lock().iter().map(|(e, _)| *e).collect();
    assert_eq!(events, vec![Event::BeforeTurn, Event::AfterTurn]);
}

// ── Provider fallback ──────────────────────────────────────────

#[tokio::test]
async fn test_fallback_candidate_succeeds() {
    let ws = TempDir::new().unwrap();
    let (hooks, _seen) = recording_dispatcher();
    let provider = MockProvider::new("mock")
        .with_error("HTTP 503: overloaded")
        .with_response("from fallback");
    let requests = provider.requests.clone();
    let agent = agent(&config(&ws, &["mock/backup"]), provider, hooks);

    let reply = agent.process_direct("hi", "openai:e", None).await.unwrap();
    assert_eq!(reply, "from fallback");

    let requests = requests.lock();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].model, "mock/primary");
    assert_eq!(requests[1].model, "mock/backup");
}

#[tokio::test]
async fn test_all_candidates_fail_dispatches_on_error() {
    let ws = TempDir::new().unwrap();
    let (hooks, seen) = recording_dispatcher();
    let provider = MockProvider::new("mock")
        .with_error("HTTP 500")
        .with_error("HTTP 500 again");
    let agent = agent(&config(&ws, &["mock/backup"]), provider, hooks);

    let err = agent.process_direct("hi", "openai:f", None).await.unwrap_err();
    assert!(err.to_string().contains("HTTP 500 again"));

    let events: Vec<Event> = seen.lock().iter().map(|(e, _)| *e).collect();
    assert!(events.contains(&Event::OnError));
    assert!(!events.contains(&Event::AfterTurn));
}

// ── Write-file reroute ─────────────────────────────────────────

#[tokio::test]
async fn test_write_file_into_memory_md_reroutes_to_append() {
    let ws = TempDir::new().unwrap();
    let memory = Arc::new(MemoryStore::new(ws.path()));
    memory.write_long_term("## Existing\n\nprior fact").unwrap();

    let tool = WriteFileTool::new(ws.path(), true, memory.clone());
    let args = serde_json::json!({
        "path": "memory/MEMORY.md",
        "content": "overwrite attempt",
    });
    let result = tool.execute(args.as_object().unwrap()).await;
    assert!(!result.is_error);
    assert!(result.for_llm.contains("Appended"));

    let content = memory.read_long_term();
    assert!(content.contains("prior fact"), "existing memory survives");
    assert!(content.contains("overwrite attempt"));
    assert!(content.contains("## "), "append is normalized with a heading");
}

// ── Session summarization ──────────────────────────────────────

#[tokio::test]
async fn test_session_summarized_past_threshold() {
    let ws = TempDir::new().unwrap();
    let (hooks, _seen) = recording_dispatcher();
    let mut cfg = config(&ws, &[]);
    cfg.memory.session_summary_message_threshold = 3;
    cfg.memory.session_summary_keep_count = 2;

    // Seed a long session on disk.
    let sessions = SessionManager::new(&ws.path().join("sessions"));
    let mut session = sessions.get_or_create("openai:long");
    for i in 0..6 {
        session.add_message(picoclaw_core::Message::text(Role::User, format!("m{i}")));
    }
    sessions.save(&session).unwrap();

    let provider = MockProvider::new("mock")
        .with_response("turn reply")
        .with_response("a compact summary");
    let agent = agent(&cfg, provider, hooks);

    agent.process_direct("one more", "openai:long", None).await.unwrap();

    // The summarization task runs out of band.
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let session = sessions.get_or_create("openai:long");
        if session.summary.is_some() {
            break;
        }
    }
    let session = sessions.get_or_create("openai:long");
    assert_eq!(session.summary.as_deref(), Some("a compact summary"));
    assert_eq!(session.messages.len(), 2);
}
