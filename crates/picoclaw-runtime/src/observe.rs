//! Turn observation: prompts, responses, memory and tool activity
//! emitted as JSONL for offline analysis, one file per UTC day.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

const PREVIEW_LEN: usize = 500;
const ARGS_PREVIEW_LEN: usize = 300;

/// Fields common to every observation event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Common {
    pub ts: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub chat_id: String,
}

impl Common {
    pub fn now(session_key: &str, channel: &str, chat_id: &str) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            session_key: session_key.to_string(),
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserveEvent {
    /// Start of a user turn, after history and summary are loaded.
    TurnStart {
        #[serde(flatten)]
        common: Common,
        #[serde(skip_serializing_if = "String::is_empty")]
        user_message: String,
        /// "relevant" | "full"
        session_mode: String,
        history_count: usize,
        summary_length: usize,
    },
    /// What memory context was injected for this turn.
    MemoryUsed {
        #[serde(flatten)]
        common: Common,
        #[serde(skip_serializing_if = "String::is_empty")]
        memory_query: String,
        /// "retrieve" | "full"
        memory_source: String,
        memory_context_length: usize,
        #[serde(skip_serializing_if = "String::is_empty")]
        memory_context_preview: String,
    },
    /// Before each model call (each iteration).
    LlmRequest {
        #[serde(flatten)]
        common: Common,
        iteration: u32,
        model: String,
        messages_count: usize,
        tools_count: usize,
        #[serde(skip_serializing_if = "String::is_empty")]
        messages_json: String,
    },
    /// After each model response.
    LlmResponse {
        #[serde(flatten)]
        common: Common,
        iteration: u32,
        content_length: usize,
        #[serde(skip_serializing_if = "String::is_empty")]
        content_preview: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<String>,
    },
    /// After each tool execution.
    ToolExecuted {
        #[serde(flatten)]
        common: Common,
        tool_name: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        args_preview: String,
        result_for_llm_length: usize,
        #[serde(skip_serializing_if = "String::is_empty")]
        error: String,
    },
    /// End of a turn (final response).
    TurnEnd {
        #[serde(flatten)]
        common: Common,
        final_content_length: usize,
        #[serde(skip_serializing_if = "String::is_empty")]
        final_content_preview: String,
        total_iterations: u32,
    },
}

/// Writes observation events as JSONL to a directory, one file per UTC
/// day.
pub struct FileObserver {
    base_path: PathBuf,
    include_full_prompt: bool,
    mu: Mutex<()>,
}

impl FileObserver {
    pub fn new(base_path: PathBuf, include_full_prompt: bool) -> Self {
        Self {
            base_path,
            include_full_prompt,
            mu: Mutex::new(()),
        }
    }

    /// Whether llm_request events should carry the full messages JSON.
    pub fn include_full_prompt(&self) -> bool {
        self.include_full_prompt
    }

    pub fn record(&self, mut event: ObserveEvent) {
        // Trim previews and honor the full-prompt switch before writing.
        match &mut event {
            ObserveEvent::MemoryUsed {
                memory_context_preview,
                ..
            } => truncate_preview(memory_context_preview, PREVIEW_LEN),
            ObserveEvent::LlmRequest { messages_json, .. } => {
                if !self.include_full_prompt {
                    messages_json.clear();
                }
            }
            ObserveEvent::LlmResponse {
                content_preview, ..
            } => truncate_preview(content_preview, PREVIEW_LEN),
            ObserveEvent::ToolExecuted { args_preview, .. } => {
                truncate_preview(args_preview, ARGS_PREVIEW_LEN)
            }
            ObserveEvent::TurnEnd {
                final_content_preview,
                ..
            } => truncate_preview(final_content_preview, PREVIEW_LEN),
            ObserveEvent::TurnStart { .. } => {}
        }

        let _guard = self.mu.lock();
        if std::fs::create_dir_all(&self.base_path).is_err() {
            return;
        }
        let name = format!("{}.jsonl", Utc::now().format("%Y-%m-%d"));
        let Ok(mut line) = serde_json::to_vec(&event) else {
            return;
        };
        line.push(b'\n');
        let _ = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.base_path.join(name))
            .and_then(|mut f| f.write_all(&line));
    }
}

fn truncate_preview(s: &mut String, max_len: usize) {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_preview_respects_char_boundary() {
        let mut s = "héllo wörld".repeat(100);
        truncate_preview(&mut s, 501);
        assert!(s.len() <= 504);
        assert!(s.ends_with("..."));
    }

    #[test]
    fn test_events_written_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let observer = FileObserver::new(dir.path().to_path_buf(), false);
        observer.record(ObserveEvent::TurnStart {
            common: Common::now("k", "api", "default"),
            user_message: "hi".into(),
            session_mode: "full".into(),
            history_count: 0,
            summary_length: 0,
        });
        observer.record(ObserveEvent::LlmRequest {
            common: Common::now("k", "api", "default"),
            iteration: 1,
            model: "m".into(),
            messages_count: 2,
            tools_count: 0,
            messages_json: "[]".into(),
        });

        let file = std::fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let content = std::fs::read_to_string(file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "turn_start");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "llm_request");
        // full prompt disabled strips messages_json
        assert!(second.get("messages_json").is_none());
    }
}
