use async_trait::async_trait;

use picoclaw_core::{Message, Result, ToolCall, ToolSpec};

/// A request to an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The model to use, e.g. "anthropic/claude-sonnet-4".
    pub model: String,
    /// Conversation, system prompt first.
    pub messages: Vec<Message>,
    /// Tools the model may call.
    pub tools: Vec<ToolSpec>,
}

/// A complete response from an LLM.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Trait implemented by each model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable name, e.g. "openrouter", "anthropic".
    fn name(&self) -> &str;

    /// Send a request and wait for the full response.
    async fn chat(&self, request: &LlmRequest) -> Result<LlmResponse>;
}
