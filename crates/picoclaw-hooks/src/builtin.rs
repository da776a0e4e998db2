//! Built-in hook handlers: workspace policy evaluation, provenance
//! metadata capture, and prompt-audit JSONL logging.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use picoclaw_core::{PicoError, Result};

use crate::policy::load_policy;
use crate::types::{Event, Handler, HookContext, HookResult};

// ── Policy ─────────────────────────────────────────────────────

/// Applies the workspace hook policy (HOOKS.md + hooks.yaml).
///
/// The workspace is read from the hook context first so one dispatcher
/// can serve many agent instances, each with a distinct workspace.
pub struct PolicyHandler {
    workspace: PathBuf,
}

impl PolicyHandler {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }
}

impl Handler for PolicyHandler {
    fn name(&self) -> &str {
        "policy"
    }

    fn handle(&self, event: Event, ctx: &HookContext) -> HookResult {
        let workspace = if ctx.workspace.is_empty() {
            self.workspace.clone()
        } else {
            PathBuf::from(&ctx.workspace)
        };

        let (policy, diag) = match load_policy(&workspace) {
            Ok(v) => v,
            Err(e) => {
                return HookResult::error("failed to load hook policy", e.to_string());
            }
        };

        let mut meta = Map::new();
        meta.insert("policy_enabled".into(), json!(policy.enabled));
        meta.insert("turn_id".into(), json!(ctx.turn_id));
        if !diag.warnings.is_empty() {
            meta.insert("warnings".into(), json!(diag.warnings));
        }

        if !policy.enabled {
            return HookResult::ok_with_metadata("hooks disabled by policy", meta);
        }

        let Some(event_policy) = policy.events.get(&event) else {
            return HookResult::ok_with_metadata("event not configured", meta);
        };
        meta.insert("event_enabled".into(), json!(event_policy.enabled));
        meta.insert("verbosity".into(), json!(event_policy.verbosity));
        if !event_policy.capture_fields.is_empty() {
            meta.insert("capture_fields".into(), json!(event_policy.capture_fields));
        }
        if !event_policy.instructions.is_empty() {
            meta.insert("instructions".into(), json!(event_policy.instructions));
        }

        if !event_policy.enabled {
            return HookResult::ok_with_metadata("event disabled by policy", meta);
        }

        let message = event_policy
            .instructions
            .first()
            .cloned()
            .unwrap_or_else(|| "policy evaluated".to_string());
        HookResult::ok_with_metadata(message, meta)
    }
}

// ── Provenance ─────────────────────────────────────────────────

/// Records normalized event metadata for reproducibility.
pub struct ProvenanceHandler;

impl Handler for ProvenanceHandler {
    fn name(&self) -> &str {
        "provenance"
    }

    fn handle(&self, event: Event, ctx: &HookContext) -> HookResult {
        let mut meta = Map::new();
        meta.insert("event".into(), json!(event.as_str()));
        meta.insert("turn_id".into(), json!(ctx.turn_id));
        meta.insert("session_key".into(), json!(ctx.session_key));
        if !ctx.tool_name.is_empty() {
            meta.insert("tool".into(), json!(ctx.tool_name));
        }
        if !ctx.metadata.is_empty() {
            meta.insert("event_metadata".into(), Value::Object(ctx.metadata.clone()));
        }
        HookResult::ok_with_metadata("provenance captured", meta)
    }
}

// ── Prompt audit ───────────────────────────────────────────────

fn empty_str(s: &&str) -> bool {
    s.is_empty()
}

/// JSONL line shape for prompt analysis (session, turn, event, and
/// optional full content).
#[derive(Serialize)]
struct PromptAuditEntry<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    ts: String,
    #[serde(skip_serializing_if = "empty_str")]
    turn_id: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    session_key: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    channel: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    chat_id: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    model: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    user_message: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    messages_json: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    llm_response_summary: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    tool_name: &'a str,
    #[serde(skip_serializing_if = "empty_str")]
    error_message: &'a str,
    #[serde(skip_serializing_if = "Map::is_empty")]
    metadata: &'a Map<String, Value>,
}

/// Writes hook events to a JSONL file for conversation/prompt analysis
/// (e.g. system prompt optimization).
pub struct PromptAuditHandler {
    path: PathBuf,
    mu: Mutex<()>,
}

impl PromptAuditHandler {
    /// Handler that appends to the given path (conventionally
    /// `<workspace>/hooks/prompt-audit.jsonl`).
    pub fn new(path: PathBuf) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(PicoError::HookPolicy("prompt audit path is empty".into()));
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| PicoError::HookPolicy(format!("create prompt audit dir: {e}")))?;
        }
        Ok(Self {
            path,
            mu: Mutex::new(()),
        })
    }
}

impl Handler for PromptAuditHandler {
    fn name(&self) -> &str {
        "prompt_audit"
    }

    fn handle(&self, event: Event, ctx: &HookContext) -> HookResult {
        let entry = PromptAuditEntry {
            event_type: event.as_str(),
            ts: ctx.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            turn_id: &ctx.turn_id,
            session_key: &ctx.session_key,
            channel: &ctx.channel,
            chat_id: &ctx.chat_id,
            model: &ctx.model,
            user_message: &ctx.user_message,
            messages_json: &ctx.messages_json,
            llm_response_summary: &ctx.llm_response_summary,
            tool_name: &ctx.tool_name,
            error_message: &ctx.error_message,
            metadata: &ctx.metadata,
        };

        let _guard = self.mu.lock();
        let mut line = match serde_json::to_vec(&entry) {
            Ok(l) => l,
            Err(e) => return HookResult::error("prompt_audit marshal failed", e.to_string()),
        };
        line.push(b'\n');
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(&line));
        match written {
            Ok(()) => HookResult::ok("prompt_audit written"),
            Err(e) => HookResult::error("prompt_audit write failed", e.to_string()),
        }
    }
}
