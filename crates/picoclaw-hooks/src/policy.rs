//! Per-workspace hook policy merged from two sources:
//!
//! - `HOOKS.md`: Markdown with `## <event>` headings and bulleted
//!   instruction lines (natural language, append-only).
//! - `hooks.yaml`: structured overrides (YAML wins for every field it
//!   sets; instructions are replaced, not appended).

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use picoclaw_core::{PicoError, Result};

use crate::types::{Event, KNOWN_EVENTS};

/// Non-fatal findings from a policy load.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPolicy {
    pub enabled: bool,
    pub verbosity: String,
    pub capture_fields: Vec<String>,
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub enabled: bool,
    pub events: HashMap<Event, EventPolicy>,
    pub redaction_keys: Vec<String>,
    pub audit_enabled: bool,
    pub audit_path: String,
}

impl Default for Policy {
    fn default() -> Self {
        let mut events = HashMap::new();
        for ev in KNOWN_EVENTS {
            events.insert(
                ev,
                EventPolicy {
                    enabled: true,
                    verbosity: "medium".into(),
                    capture_fields: vec![],
                    instructions: vec![],
                },
            );
        }
        Self {
            enabled: true,
            events,
            redaction_keys: vec![
                "api_key".into(),
                "token".into(),
                "secret".into(),
                "authorization".into(),
                "password".into(),
            ],
            audit_enabled: true,
            audit_path: "hooks/hook-events.jsonl".into(),
        }
    }
}

/// Load and merge workspace `HOOKS.md` and `hooks.yaml`.
/// Precedence: hooks.yaml overrides HOOKS.md; both start from defaults.
/// Relative audit paths are resolved against the workspace.
pub fn load_policy(workspace: &Path) -> Result<(Policy, Diagnostics)> {
    let mut policy = Policy::default();
    let mut diag = Diagnostics::default();

    parse_natural_language_policy(workspace, &mut policy)?;
    parse_yaml_overrides(workspace, &mut policy, &mut diag)?;

    if !policy.audit_path.is_empty() && !Path::new(&policy.audit_path).is_absolute() {
        policy.audit_path = workspace
            .join(&policy.audit_path)
            .to_string_lossy()
            .into_owned();
    }

    Ok((policy, diag))
}

// ── HOOKS.md ───────────────────────────────────────────────────

fn parse_natural_language_policy(workspace: &Path, policy: &mut Policy) -> Result<()> {
    let path = workspace.join("HOOKS.md");
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut current: Option<Event> = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(head) = line.strip_prefix("##") {
            current = normalize_event(head.trim());
            continue;
        }

        if current.is_none() {
            current = infer_event_from_sentence(line);
        }
        let Some(event) = current else { continue };

        if line.starts_with('-') || line.starts_with('*') {
            let instruction = line.trim_start_matches(['-', '*']).trim().to_string();
            policy
                .events
                .entry(event)
                .or_default()
                .instructions
                .push(instruction);
        }
    }
    Ok(())
}

/// Infer the event a free-form sentence talks about ("before each turn,
/// do X" sets the context for following bullets).
fn infer_event_from_sentence(line: &str) -> Option<Event> {
    let lower = line.to_lowercase();
    if lower.contains("before turn") {
        Some(Event::BeforeTurn)
    } else if lower.contains("after turn") {
        Some(Event::AfterTurn)
    } else if lower.contains("before llm") {
        Some(Event::BeforeLlm)
    } else if lower.contains("after llm") {
        Some(Event::AfterLlm)
    } else if lower.contains("before tool") {
        Some(Event::BeforeTool)
    } else if lower.contains("after tool") {
        Some(Event::AfterTool)
    } else if lower.contains("on error") || lower.contains("error") {
        Some(Event::OnError)
    } else {
        None
    }
}

// ── hooks.yaml ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawYamlPolicy {
    enabled: Option<bool>,
    #[serde(default)]
    events: HashMap<String, RawYamlEvent>,
    #[serde(default)]
    redaction: RawYamlRedaction,
    #[serde(default)]
    audit: RawYamlAudit,
}

#[derive(Debug, Default, Deserialize)]
struct RawYamlEvent {
    enabled: Option<bool>,
    #[serde(default)]
    verbosity: String,
    #[serde(default)]
    capture_fields: Vec<String>,
    #[serde(default)]
    instructions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawYamlRedaction {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawYamlAudit {
    enabled: Option<bool>,
    #[serde(default)]
    path: String,
}

fn parse_yaml_overrides(workspace: &Path, policy: &mut Policy, diag: &mut Diagnostics) -> Result<()> {
    let path = workspace.join("hooks.yaml");
    let data = match std::fs::read_to_string(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if data.trim().is_empty() {
        return Ok(());
    }

    let raw: RawYamlPolicy = serde_yaml::from_str(&data)
        .map_err(|e| PicoError::HookPolicy(format!("parse hooks.yaml: {e}")))?;

    if let Some(enabled) = raw.enabled {
        policy.enabled = enabled;
    }
    if !raw.redaction.keys.is_empty() {
        policy.redaction_keys = raw.redaction.keys;
    }
    if let Some(enabled) = raw.audit.enabled {
        policy.audit_enabled = enabled;
    }
    if !raw.audit.path.is_empty() {
        policy.audit_path = raw.audit.path;
    }

    for (key, cfg) in raw.events {
        let Some(ev) = normalize_event(&key) else {
            diag.warnings.push(format!("hooks.yaml unknown event: {key}"));
            continue;
        };
        let ep = policy.events.entry(ev).or_default();
        if let Some(enabled) = cfg.enabled {
            ep.enabled = enabled;
        }
        if !cfg.verbosity.is_empty() {
            ep.verbosity = cfg.verbosity;
        }
        if !cfg.capture_fields.is_empty() {
            ep.capture_fields = cfg.capture_fields;
        }
        if !cfg.instructions.is_empty() {
            ep.instructions = cfg.instructions;
        }
    }

    Ok(())
}

/// Normalize a user-written event name (case, spacing, hyphens) to a
/// known event. `error` aliases `on_error`. Idempotent for known events.
pub fn normalize_event(input: &str) -> Option<Event> {
    let mut norm = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            'A'..='Z' => norm.push(c.to_ascii_lowercase()),
            'a'..='z' | '0'..='9' => norm.push(c),
            '_' | '-' | ' ' => norm.push('_'),
            _ => {}
        }
    }
    while norm.contains("__") {
        norm = norm.replace("__", "_");
    }
    let norm = norm.trim_matches('_');

    match norm {
        "before_turn" => Some(Event::BeforeTurn),
        "after_turn" => Some(Event::AfterTurn),
        "before_llm" => Some(Event::BeforeLlm),
        "after_llm" => Some(Event::AfterLlm),
        "before_tool" => Some(Event::BeforeTool),
        "after_tool" => Some(Event::AfterTool),
        "on_error" | "error" => Some(Event::OnError),
        _ => None,
    }
}
