use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use picoclaw_core::{PicoError, Result};

use crate::types::{AuditEntry, AuditSink};

/// Appends hook audit entries as JSONL, one object per line. Writes are
/// serialized under a mutex so lines never interleave.
pub struct JsonlAuditSink {
    path: PathBuf,
    mu: Mutex<()>,
}

impl JsonlAuditSink {
    /// Sink at the default workspace location `hooks/hook-events.jsonl`.
    pub fn for_workspace(workspace: &Path) -> Result<Self> {
        Self::at(workspace.join("hooks").join("hook-events.jsonl"))
    }

    /// Sink at an explicit path, creating parent directories.
    pub fn at(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| PicoError::Memory(format!("create hooks audit dir: {e}")))?;
        }
        Ok(Self {
            path,
            mu: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn write(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.mu.lock();
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(&line)?;
        Ok(())
    }
}
