//! Tool registry and the built-in workspace/memory tools.

pub mod files;
pub mod memory;

use std::sync::Arc;

use picoclaw_core::{Tool, ToolResult, ToolSpec};

pub use files::{AppendFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use memory::{MemoryAppendTool, MemorySearchTool};

/// Holds the tools the agent can invoke, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Tool descriptors advertised to the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// One-line summaries for the system prompt.
    pub fn summaries(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.summary()).collect()
    }

    /// Execute a tool by name. An unknown tool yields an error-valued
    /// result, never a failure of the turn.
    pub async fn execute(
        &self,
        name: &str,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute(args).await,
            None => ToolResult::error(format!("tool not found: {name}")),
        }
    }
}
