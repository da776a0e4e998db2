//! Workspace file tools: read, write (with the long-term-memory
//! reroute), append, and directory listing.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use picoclaw_core::{Tool, ToolResult};
use picoclaw_memory::MemoryStore;

/// Resolve a user-supplied path against the workspace, normalizing `..`
/// lexically. Returns None when `restrict` is set and the result leaves
/// the workspace.
fn resolve_path(workspace: &Path, raw: &str, restrict: bool) -> Option<PathBuf> {
    let raw_path = Path::new(raw);
    let joined = if raw_path.is_absolute() {
        raw_path.to_path_buf()
    } else {
        workspace.join(raw_path)
    };

    let mut normalized = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    if restrict && !normalized.starts_with(workspace) {
        return None;
    }
    Some(normalized)
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

// ── read_file ──────────────────────────────────────────────────

pub struct ReadFileTool {
    workspace: PathBuf,
    restrict: bool,
}

impl ReadFileTool {
    pub fn new(workspace: &Path, restrict: bool) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            restrict,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read a file from the workspace. Returns its text content."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path, relative to the workspace"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let Some(raw) = str_arg(args, "path") else {
            return ToolResult::error("path is required");
        };
        let Some(path) = resolve_path(&self.workspace, raw, self.restrict) else {
            return ToolResult::error(format!("path escapes the workspace: {raw}"));
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => ToolResult::ok(content),
            Err(e) => ToolResult::error(format!("read {}: {e}", path.display())),
        }
    }
}

// ── write_file ─────────────────────────────────────────────────

/// Writes a file, creating parent directories. A write aimed at the
/// long-term memory file is rerouted to a normalized append so models
/// cannot corrupt MEMORY.md.
pub struct WriteFileTool {
    workspace: PathBuf,
    restrict: bool,
    memory: Arc<MemoryStore>,
}

impl WriteFileTool {
    pub fn new(workspace: &Path, restrict: bool, memory: Arc<MemoryStore>) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            restrict,
            memory,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write text content to a file, creating parent directories as needed."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path, relative to the workspace"},
                "content": {"type": "string", "description": "Text content to write"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let Some(raw) = str_arg(args, "path") else {
            return ToolResult::error("path is required");
        };
        let Some(content) = str_arg(args, "content") else {
            return ToolResult::error("content is required");
        };
        let Some(path) = resolve_path(&self.workspace, raw, self.restrict) else {
            return ToolResult::error(format!("path escapes the workspace: {raw}"));
        };

        if path == self.memory.long_term_path() {
            info!("write_file into MEMORY.md rerouted to long-term append");
            return match self.memory.append_long_term(content) {
                Ok(()) => ToolResult::ok("Appended to long-term memory."),
                Err(e) => ToolResult::error(format!("memory append failed: {e}")),
            };
        }

        if let Some(dir) = path.parent()
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            return ToolResult::error(format!("create {}: {e}", dir.display()));
        }
        match std::fs::write(&path, content) {
            Ok(()) => ToolResult::ok(format!("Wrote {} bytes to {raw}", content.len())),
            Err(e) => ToolResult::error(format!("write {}: {e}", path.display())),
        }
    }
}

// ── append_file ────────────────────────────────────────────────

pub struct AppendFileTool {
    workspace: PathBuf,
    restrict: bool,
}

impl AppendFileTool {
    pub fn new(workspace: &Path, restrict: bool) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            restrict,
        }
    }
}

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str {
        "append_file"
    }
    fn description(&self) -> &str {
        "Append text content to a file, creating it if missing."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path, relative to the workspace"},
                "content": {"type": "string", "description": "Text content to append"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let Some(raw) = str_arg(args, "path") else {
            return ToolResult::error("path is required");
        };
        let Some(content) = str_arg(args, "content") else {
            return ToolResult::error("content is required");
        };
        let Some(path) = resolve_path(&self.workspace, raw, self.restrict) else {
            return ToolResult::error(format!("path escapes the workspace: {raw}"));
        };
        if let Some(dir) = path.parent()
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            return ToolResult::error(format!("create {}: {e}", dir.display()));
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, content.as_bytes()));
        match result {
            Ok(()) => ToolResult::ok(format!("Appended {} bytes to {raw}", content.len())),
            Err(e) => ToolResult::error(format!("append {}: {e}", path.display())),
        }
    }
}

// ── list_dir ───────────────────────────────────────────────────

pub struct ListDirTool {
    workspace: PathBuf,
    restrict: bool,
}

impl ListDirTool {
    pub fn new(workspace: &Path, restrict: bool) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            restrict,
        }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn description(&self) -> &str {
        "List the entries of a workspace directory."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path, relative to the workspace (default: workspace root)"}
            }
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let raw = str_arg(args, "path").unwrap_or(".");
        let Some(path) = resolve_path(&self.workspace, raw, self.restrict) else {
            return ToolResult::error(format!("path escapes the workspace: {raw}"));
        };
        let entries = match std::fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) => return ToolResult::error(format!("list {}: {e}", path.display())),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                if e.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();
        if names.is_empty() {
            ToolResult::ok("(empty)")
        } else {
            ToolResult::ok(names.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_restricted() {
        let ws = Path::new("/ws/agent");
        assert_eq!(
            resolve_path(ws, "notes/a.md", true),
            Some(PathBuf::from("/ws/agent/notes/a.md"))
        );
        assert_eq!(
            resolve_path(ws, "a/../b.md", true),
            Some(PathBuf::from("/ws/agent/b.md"))
        );
        assert_eq!(resolve_path(ws, "../outside.md", true), None);
        assert_eq!(resolve_path(ws, "/etc/passwd", true), None);
    }

    #[test]
    fn test_resolve_path_unrestricted_allows_escape() {
        let ws = Path::new("/ws/agent");
        assert_eq!(
            resolve_path(ws, "/tmp/x", false),
            Some(PathBuf::from("/tmp/x"))
        );
    }
}
