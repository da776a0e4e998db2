use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use picoclaw_core::{Message, Result};

/// Persistent conversation state for one session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Rolling summary of archived history, when summarization has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            messages: vec![],
            summary: None,
            updated_at: Utc::now(),
        }
    }

    pub fn add_message(&mut self, msg: Message) {
        self.messages.push(msg);
        self.updated_at = Utc::now();
    }

    /// Estimated token footprint of the live history.
    pub fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }

    /// Replace the archived history with a summary plus the most recent
    /// `keep` messages.
    pub fn archive_to_summary(&mut self, summary: String, keep: usize) {
        let keep = keep.min(self.messages.len());
        self.messages = self.messages.split_off(self.messages.len() - keep);
        self.summary = Some(summary);
        self.updated_at = Utc::now();
    }
}

/// Loads and saves sessions as `sessions/<sanitized-key>.json`.
///
/// One writer per session key: the agent runtime serializes turns for a
/// given key, so writes here never race.
pub struct SessionManager {
    sessions_dir: PathBuf,
}

impl SessionManager {
    pub fn new(sessions_dir: &Path) -> Self {
        let _ = fs::create_dir_all(sessions_dir);
        Self {
            sessions_dir: sessions_dir.to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", sanitize_key(key)))
    }

    /// Load a session, or start a fresh one when the file is missing or
    /// unreadable.
    pub fn get_or_create(&self, key: &str) -> Session {
        match fs::read(self.path_for(key)) {
            Ok(data) => match serde_json::from_slice::<Session>(&data) {
                Ok(session) => session,
                Err(e) => {
                    warn!(key, error = %e, "session file unreadable, starting fresh");
                    Session::new(key)
                }
            },
            Err(_) => Session::new(key),
        }
    }

    /// Persist a session atomically (temp sibling + rename).
    pub fn save(&self, session: &Session) -> Result<()> {
        let path = self.path_for(&session.key);
        let data = serde_json::to_vec_pretty(session)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Make a session key filesystem-safe.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
