//! Memory tools: query-based search over long-term memory and appends
//! to long-term memory or today's daily note.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use picoclaw_core::{Tool, ToolResult};
use picoclaw_memory::MemoryStore;

/// Lets the model search long-term memory by query.
pub struct MemorySearchTool {
    memory: Arc<MemoryStore>,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }
    fn description(&self) -> &str {
        "Search long-term memory by query. Returns relevant memory chunks. Use when you need to recall specific information."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query (keywords or question)"},
                "limit": {"type": "integer", "description": "Max number of chunks to return (default 10)"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let query = args.get("query").and_then(Value::as_str).unwrap_or("");
        if query.is_empty() {
            return ToolResult::error("query is required");
        }
        let limit = match args.get("limit") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(10) as usize,
            Some(Value::String(s)) => s.parse().unwrap_or(10),
            _ => 10,
        };
        let limit = if limit == 0 { 10 } else { limit };

        let out = self.memory.retrieve(query, limit);
        if out.is_empty() {
            ToolResult::ok("No relevant memory found.")
        } else {
            ToolResult::ok(out)
        }
    }
}

/// Lets the model append to long-term memory or today's daily note.
pub struct MemoryAppendTool {
    memory: Arc<MemoryStore>,
}

impl MemoryAppendTool {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryAppendTool {
    fn name(&self) -> &str {
        "memory_append"
    }
    fn description(&self) -> &str {
        "Append a note to long-term memory (MEMORY.md) or today's daily note. Use for facts, preferences, or things to remember."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "Content to append"},
                "slot": {"type": "string", "description": "Where to append: 'long_term' (default) or 'today'"}
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let content = args.get("content").and_then(Value::as_str).unwrap_or("");
        if content.is_empty() {
            return ToolResult::error("content is required");
        }
        let slot = args
            .get("slot")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("long_term");

        let result = match slot {
            "today" => self.memory.append_today(content),
            "long_term" => self.memory.append_long_term(content),
            other => {
                return ToolResult::error(format!(
                    "slot must be 'long_term' or 'today', got '{other}'"
                ));
            }
        };
        match result {
            Ok(()) => ToolResult::ok(format!("Appended to {slot} memory.")),
            Err(e) => ToolResult::error(format!("memory append failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<MemoryStore>) {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryStore::new(dir.path()));
        (dir, memory)
    }

    fn args(json: Value) -> Map<String, Value> {
        json.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let (_dir, memory) = setup();
        let tool = MemorySearchTool::new(memory);
        let result = tool.execute(&args(json!({}))).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_search_no_results_message() {
        let (_dir, memory) = setup();
        let tool = MemorySearchTool::new(memory);
        let result = tool.execute(&args(json!({"query": "anything"}))).await;
        assert!(!result.is_error);
        assert_eq!(result.for_llm, "No relevant memory found.");
    }

    #[tokio::test]
    async fn test_append_then_search() {
        let (_dir, memory) = setup();
        let append = MemoryAppendTool::new(memory.clone());
        let result = append
            .execute(&args(json!({"content": "User likes espresso"})))
            .await;
        assert!(!result.is_error);

        let search = MemorySearchTool::new(memory);
        let result = search.execute(&args(json!({"query": "espresso"}))).await;
        assert!(result.for_llm.contains("espresso"));
    }

    #[tokio::test]
    async fn test_append_today_slot() {
        let (_dir, memory) = setup();
        let tool = MemoryAppendTool::new(memory.clone());
        let result = tool
            .execute(&args(json!({"content": "met Bob", "slot": "today"})))
            .await;
        assert!(!result.is_error);
        assert!(memory.read_today().contains("met Bob"));
    }

    #[tokio::test]
    async fn test_append_invalid_slot() {
        let (_dir, memory) = setup();
        let tool = MemoryAppendTool::new(memory);
        let result = tool
            .execute(&args(json!({"content": "x", "slot": "nowhere"})))
            .await;
        assert!(result.is_error);
    }
}
