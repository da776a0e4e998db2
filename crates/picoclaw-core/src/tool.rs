use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool descriptor advertised to the model (JSON-schema parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The result a tool hands back to the agent loop.
///
/// `for_llm` is the text surfaced to the model; `is_error` marks a failed
/// execution without aborting the turn.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub for_llm: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            is_error: false,
        }
    }

    pub fn error(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            is_error: true,
        }
    }
}

/// Trait implemented by every tool the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    /// Execute the tool. Failures are reported through
    /// [`ToolResult::error`], never by panicking.
    async fn execute(&self, args: &serde_json::Map<String, Value>) -> ToolResult;

    /// A short one-line summary for the system prompt tools section.
    fn summary(&self) -> String {
        format!("- **{}**: {}", self.name(), self.description())
    }
}
