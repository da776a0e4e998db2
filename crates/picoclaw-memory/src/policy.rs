use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use picoclaw_config::MemoryConfig;
use picoclaw_core::Result;

use crate::store::MemoryStore;

/// Default memory policy values.
pub const DEFAULT_RETRIEVE_LIMIT: usize = 10;
pub const DEFAULT_RECENT_DAYS: usize = 3;
pub const DEFAULT_SESSION_SUMMARY_MESSAGE_THRESHOLD: usize = 20;
pub const DEFAULT_SESSION_SUMMARY_TOKEN_PERCENT: usize = 75;
pub const DEFAULT_SESSION_SUMMARY_KEEP_COUNT: usize = 4;
pub const DEFAULT_SESSION_RELEVANT_FALLBACK_KEEP: usize = 8;

/// Read-only memory policy consumed by the agent loop and context
/// builder. Built from config defaults merged with workspace
/// `memory/policy_overrides.json`; consumers never see the raw maps.
#[derive(Debug, Clone)]
pub struct MemoryPolicy {
    retrieve_limit: usize,
    recent_days: usize,
    session_summary_message_threshold: usize,
    session_summary_token_percent: usize,
    session_summary_keep_count: usize,
    session_relevant_history_limit: usize,
    session_relevant_fallback_keep: usize,
    long_term_compress_char_threshold: usize,
    evolution_enabled: bool,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            retrieve_limit: DEFAULT_RETRIEVE_LIMIT,
            recent_days: DEFAULT_RECENT_DAYS,
            session_summary_message_threshold: DEFAULT_SESSION_SUMMARY_MESSAGE_THRESHOLD,
            session_summary_token_percent: DEFAULT_SESSION_SUMMARY_TOKEN_PERCENT,
            session_summary_keep_count: DEFAULT_SESSION_SUMMARY_KEEP_COUNT,
            session_relevant_history_limit: 0,
            session_relevant_fallback_keep: DEFAULT_SESSION_RELEVANT_FALLBACK_KEEP,
            long_term_compress_char_threshold: 0,
            evolution_enabled: false,
        }
    }
}

impl MemoryPolicy {
    /// Build a policy from config, then apply workspace overrides.
    pub fn from_config(cfg: &MemoryConfig, workspace: &Path) -> Self {
        let mut p = Self {
            retrieve_limit: cfg.retrieve_limit as usize,
            recent_days: cfg.recent_days as usize,
            session_summary_message_threshold: cfg.session_summary_message_threshold as usize,
            session_summary_token_percent: cfg.session_summary_token_percent as usize,
            session_summary_keep_count: cfg.session_summary_keep_count as usize,
            session_relevant_history_limit: cfg.session_relevant_history_limit as usize,
            session_relevant_fallback_keep: cfg
                .session_relevant_fallback_keep
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_SESSION_RELEVANT_FALLBACK_KEEP),
            long_term_compress_char_threshold: cfg.long_term_compress_char_threshold as usize,
            evolution_enabled: cfg.evolution_enabled,
        };
        if let Some(o) = PolicyOverrides::load(workspace) {
            p.apply(&o);
        }
        p
    }

    fn apply(&mut self, o: &PolicyOverrides) {
        if let Some(v) = o.retrieve_limit {
            self.retrieve_limit = v;
        }
        if let Some(v) = o.recent_days {
            self.recent_days = v;
        }
        if let Some(v) = o.session_summary_message_threshold {
            self.session_summary_message_threshold = v;
        }
        if let Some(v) = o.session_summary_token_percent {
            self.session_summary_token_percent = v;
        }
        if let Some(v) = o.session_summary_keep_count {
            self.session_summary_keep_count = v;
        }
        if let Some(v) = o.session_relevant_history_limit {
            self.session_relevant_history_limit = v;
        }
        if let Some(v) = o.session_relevant_fallback_keep {
            self.session_relevant_fallback_keep = v;
        }
        if let Some(v) = o.long_term_compress_char_threshold {
            self.long_term_compress_char_threshold = v;
        }
        if let Some(v) = o.evolution_enabled {
            self.evolution_enabled = v;
        }
    }

    pub fn retrieve_limit(&self) -> usize {
        if self.retrieve_limit == 0 {
            DEFAULT_RETRIEVE_LIMIT
        } else {
            self.retrieve_limit
        }
    }

    pub fn recent_days(&self) -> usize {
        if self.recent_days == 0 {
            DEFAULT_RECENT_DAYS
        } else {
            self.recent_days
        }
    }

    pub fn session_summary_message_threshold(&self) -> usize {
        if self.session_summary_message_threshold == 0 {
            DEFAULT_SESSION_SUMMARY_MESSAGE_THRESHOLD
        } else {
            self.session_summary_message_threshold
        }
    }

    pub fn session_summary_token_percent(&self) -> usize {
        if self.session_summary_token_percent == 0 {
            DEFAULT_SESSION_SUMMARY_TOKEN_PERCENT
        } else {
            self.session_summary_token_percent
        }
    }

    pub fn session_summary_keep_count(&self) -> usize {
        if self.session_summary_keep_count == 0 {
            DEFAULT_SESSION_SUMMARY_KEEP_COUNT
        } else {
            self.session_summary_keep_count
        }
    }

    /// Max turns for query-based session history. 0 disables the feature.
    pub fn session_relevant_history_limit(&self) -> usize {
        self.session_relevant_history_limit
    }

    /// Fallback last-N messages when no turn matches. 0 means no history
    /// at all when nothing matches.
    pub fn session_relevant_fallback_keep(&self) -> usize {
        self.session_relevant_fallback_keep
    }

    /// Compress the long-term file above this many chars. 0 disables.
    pub fn long_term_compress_char_threshold(&self) -> usize {
        self.long_term_compress_char_threshold
    }

    pub fn evolution_enabled(&self) -> bool {
        self.evolution_enabled
    }
}

/// Workspace policy overrides: a subset of the memory config with
/// explicit optionality (absent = inherit).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieve_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_days: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_summary_message_threshold: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_summary_token_percent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_summary_keep_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_relevant_history_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_relevant_fallback_keep: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_term_compress_char_threshold: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evolution_enabled: Option<bool>,
}

fn overrides_path(workspace: &Path) -> PathBuf {
    workspace.join("memory").join("policy_overrides.json")
}

impl PolicyOverrides {
    /// Load workspace overrides; unreadable or malformed files read as none.
    pub fn load(workspace: &Path) -> Option<Self> {
        let data = std::fs::read(overrides_path(workspace)).ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Merge `src` into `self`: every set field wins.
    pub fn merge(&mut self, src: &PolicyOverrides) {
        macro_rules! take {
            ($field:ident) => {
                if src.$field.is_some() {
                    self.$field = src.$field.clone();
                }
            };
        }
        take!(retrieve_limit);
        take!(recent_days);
        take!(session_summary_message_threshold);
        take!(session_summary_token_percent);
        take!(session_summary_keep_count);
        take!(session_relevant_history_limit);
        take!(session_relevant_fallback_keep);
        take!(long_term_compress_char_threshold);
        take!(evolution_enabled);
    }

    fn is_empty(&self) -> bool {
        self.retrieve_limit.is_none()
            && self.recent_days.is_none()
            && self.session_summary_message_threshold.is_none()
            && self.session_summary_token_percent.is_none()
            && self.session_summary_keep_count.is_none()
            && self.session_relevant_history_limit.is_none()
            && self.session_relevant_fallback_keep.is_none()
            && self.long_term_compress_char_threshold.is_none()
            && self.evolution_enabled.is_none()
    }

    /// Apply new overrides to the workspace file. A snapshot of the prior
    /// file is saved before the mutation so rollback stays possible.
    pub fn update(workspace: &Path, store: &MemoryStore, new: &PolicyOverrides) -> Result<()> {
        if new.is_empty() {
            return Ok(());
        }
        let path = overrides_path(workspace);
        if let Ok(current) = std::fs::read(&path)
            && !current.is_empty()
        {
            store.save_policy_snapshot(&current)?;
        }
        let mut merged = PolicyOverrides::load(workspace).unwrap_or_default();
        merged.merge(new);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_vec_pretty(&merged)?;
        std::fs::write(&path, data)?;
        info!(workspace = %workspace.display(), "memory policy overrides updated");
        Ok(())
    }

    /// Parse a reflection result into overrides. Accepts a JSON object or
    /// `key: value` / `key = value` lines. Returns None when nothing
    /// recognizable was found.
    pub fn parse_reflection(s: &str) -> Option<PolicyOverrides> {
        let s = s.trim();
        if let Ok(o) = serde_json::from_str::<PolicyOverrides>(s)
            && !o.is_empty()
        {
            return Some(o);
        }
        let mut o = PolicyOverrides::default();
        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once(':').or_else(|| line.split_once('=')) else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let val = val.trim();
            if let Ok(n) = val.parse::<usize>() {
                match key.as_str() {
                    "retrieve_limit" => o.retrieve_limit = Some(n),
                    "recent_days" => o.recent_days = Some(n),
                    "session_summary_message_threshold" => {
                        o.session_summary_message_threshold = Some(n)
                    }
                    "session_summary_token_percent" => o.session_summary_token_percent = Some(n),
                    "session_summary_keep_count" => o.session_summary_keep_count = Some(n),
                    "session_relevant_history_limit" => o.session_relevant_history_limit = Some(n),
                    "session_relevant_fallback_keep" => o.session_relevant_fallback_keep = Some(n),
                    "long_term_compress_char_threshold" => {
                        o.long_term_compress_char_threshold = Some(n)
                    }
                    _ => {}
                }
            }
            if key.starts_with("evolution") {
                o.evolution_enabled = Some(val.to_lowercase().contains("true") || val == "1");
            }
        }
        if o.is_empty() { None } else { Some(o) }
    }
}
