use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A hook lifecycle trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    BeforeTurn,
    AfterTurn,
    BeforeLlm,
    AfterLlm,
    BeforeTool,
    AfterTool,
    OnError,
}

pub const KNOWN_EVENTS: [Event; 7] = [
    Event::BeforeTurn,
    Event::AfterTurn,
    Event::BeforeLlm,
    Event::AfterLlm,
    Event::BeforeTool,
    Event::AfterTool,
    Event::OnError,
];

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BeforeTurn => "before_turn",
            Event::AfterTurn => "after_turn",
            Event::BeforeLlm => "before_llm",
            Event::AfterLlm => "after_llm",
            Event::BeforeTool => "before_tool",
            Event::AfterTool => "after_tool",
            Event::OnError => "on_error",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable hook event snapshot, value-copied into each handler so one
/// handler cannot mutate another's view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub turn_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tool_args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_result: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub llm_response_summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    /// Full messages array JSON (before_llm, when prompt audit asks for it).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub messages_json: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Default for HookContext {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            turn_id: String::new(),
            session_key: String::new(),
            channel: String::new(),
            chat_id: String::new(),
            model: String::new(),
            workspace: String::new(),
            user_message: String::new(),
            tool_name: String::new(),
            tool_args: Map::new(),
            tool_result: String::new(),
            llm_response_summary: String::new(),
            error_message: String::new(),
            messages_json: String::new(),
            metadata: Map::new(),
        }
    }
}

impl HookContext {
    pub fn new(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            ..Default::default()
        }
    }
}

/// Hook execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
    Ok,
    Error,
}

/// The result of running one handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResult {
    pub status: HookStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl HookResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HookStatus::Ok,
            message: message.into(),
            metadata: Map::new(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn ok_with_metadata(message: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            metadata,
            ..Self::ok(message)
        }
    }

    pub fn error(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: HookStatus::Error,
            message: message.into(),
            metadata: Map::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }
}

/// Handles hook events. Handlers run synchronously and must tolerate
/// being called from any dispatch site.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, event: Event, ctx: &HookContext) -> HookResult;
}

/// One audit line persisted per handler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub turn_id: String,
    pub event: Event,
    pub handler: String,
    pub status: HookStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Writes hook audit entries. Failures are swallowed by the dispatcher.
pub trait AuditSink: Send + Sync {
    fn write(&self, entry: &AuditEntry) -> picoclaw_core::Result<()>;
}
