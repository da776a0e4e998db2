use chrono::{Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use picoclaw_core::{PicoError, Result};

/// Manages persistent memory for one workspace.
///
/// - Long-term memory: `memory/MEMORY.md`
/// - Daily notes: `memory/YYYYMM/YYYYMMDD.md`
/// - Backups: `memory/backups/YYYYMMDD_HHMMSS_MEMORY.md`
pub struct MemoryStore {
    memory_dir: PathBuf,
    memory_file: PathBuf,
}

impl MemoryStore {
    /// Create a store rooted at the given workspace, ensuring the memory
    /// directory exists.
    pub fn new(workspace: &Path) -> Self {
        let memory_dir = workspace.join("memory");
        let memory_file = memory_dir.join("MEMORY.md");
        let _ = fs::create_dir_all(&memory_dir);
        Self {
            memory_dir,
            memory_file,
        }
    }

    /// Path to today's daily note (`memory/YYYYMM/YYYYMMDD.md`, UTC date).
    fn today_file(&self) -> PathBuf {
        let today = Utc::now().format("%Y%m%d").to_string();
        self.memory_dir.join(&today[..6]).join(format!("{today}.md"))
    }

    fn backups_dir(&self) -> PathBuf {
        self.memory_dir.join("backups")
    }

    fn policy_snapshots_dir(&self) -> PathBuf {
        self.memory_dir.join("policy_snapshots")
    }

    /// Sentinel file gating long-term compression to roughly once a day.
    fn compress_sentinel(&self) -> PathBuf {
        self.memory_dir.join(".last_longterm_compress")
    }

    /// Read the long-term memory file. Missing file reads as empty.
    pub fn read_long_term(&self) -> String {
        fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    /// Copy the current MEMORY.md to `backups/YYYYMMDD_HHMMSS_MEMORY.md`.
    /// No-op if MEMORY.md does not exist.
    pub fn backup_long_term(&self) -> Result<()> {
        let data = match fs::read(&self.memory_file) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let back_dir = self.backups_dir();
        fs::create_dir_all(&back_dir)?;
        let name = format!("{}_MEMORY.md", Utc::now().format("%Y%m%d_%H%M%S"));
        fs::write(back_dir.join(name), data)?;
        Ok(())
    }

    /// Write the long-term memory file. Backs up the existing file first,
    /// then writes a temp sibling and renames it into place so readers see
    /// either the prior or the new content, never a partial file.
    pub fn write_long_term(&self, content: &str) -> Result<()> {
        if self.memory_file.exists() {
            self.backup_long_term()
                .map_err(|e| PicoError::Memory(format!("backup before write: {e}")))?;
        }
        let tmp = self.memory_file.with_extension("md.tmp");
        fs::write(&tmp, content)?;
        if let Err(e) = fs::rename(&tmp, &self.memory_file) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Append a normalized entry to long-term memory, preserving chunk
    /// boundaries for future retrievals.
    pub fn append_long_term(&self, content: &str) -> Result<()> {
        let normalized = normalize_long_term_entry(content);
        if normalized.is_empty() {
            return Ok(());
        }
        let mut cur = self.read_long_term();
        if !cur.is_empty() {
            cur.push_str("\n\n");
        }
        cur.push_str(&normalized);
        self.write_long_term(&cur)
    }

    /// Read today's daily note. Missing file reads as empty.
    pub fn read_today(&self) -> String {
        fs::read_to_string(self.today_file()).unwrap_or_default()
    }

    /// Append content to today's daily note, prepending a dated header on
    /// the first write of the day.
    pub fn append_today(&self, content: &str) -> Result<()> {
        let today_file = self.today_file();
        if let Some(month_dir) = today_file.parent() {
            fs::create_dir_all(month_dir)?;
        }
        let existing = fs::read_to_string(&today_file).unwrap_or_default();
        let new_content = if existing.is_empty() {
            format!("# {}\n\n{}", Utc::now().format("%Y-%m-%d"), content)
        } else {
            format!("{existing}\n{content}")
        };
        fs::write(&today_file, new_content)?;
        Ok(())
    }

    /// Daily notes from today and the previous `days - 1` days, joined
    /// with `---` separators. Missing days are skipped.
    pub fn get_recent_daily_notes(&self, days: usize) -> String {
        let mut notes = Vec::new();
        for i in 0..days {
            let date = Utc::now() - Duration::days(i as i64);
            let date_str = date.format("%Y%m%d").to_string();
            let path = self
                .memory_dir
                .join(&date_str[..6])
                .join(format!("{date_str}.md"));
            if let Ok(data) = fs::read_to_string(path) {
                notes.push(data);
            }
        }
        notes.join("\n\n---\n\n")
    }

    /// Return memory content relevant to the query: split MEMORY.md into
    /// chunks, score by keyword overlap, and keep the top `limit` chunks
    /// with a positive score (the best chunk is kept even at score 0).
    /// `limit` of 0 defaults to 10.
    pub fn retrieve(&self, query: &str, limit: usize) -> String {
        let limit = if limit == 0 { 10 } else { limit };
        let query = query.trim();
        let long_term = self.read_long_term();
        if long_term.is_empty() {
            return String::new();
        }
        let raw_chunks = split_memory_chunks(&long_term);
        if raw_chunks.is_empty() {
            return String::new();
        }

        let query_lower = query.to_lowercase();
        let query_words = tokenize_for_match(&query_lower);
        let mut chunks: Vec<(String, i32)> = raw_chunks
            .into_iter()
            .map(|text| {
                let score = score_chunk(&text, &query_lower, &query_words);
                (text, score)
            })
            .collect();

        // Stable: equal scores keep insertion order.
        chunks.sort_by(|a, b| b.1.cmp(&a.1));

        let mut out = String::new();
        for (i, (text, score)) in chunks.iter().take(limit).enumerate() {
            if *score <= 0 && i > 0 {
                break;
            }
            if i > 0 {
                out.push_str("\n\n---\n\n");
            }
            out.push_str(text);
        }
        out
    }

    /// Formatted memory context for the agent prompt. A non-empty query
    /// selects relevant chunks; when retrieval finds nothing (or the query
    /// is empty) the full long-term content is used. Recent daily notes
    /// are always appended when present. `recent_days`/`retrieve_limit`
    /// of 0 use the defaults 3 and 10.
    pub fn get_memory_context(
        &self,
        query: &str,
        recent_days: usize,
        retrieve_limit: usize,
    ) -> String {
        let recent_days = if recent_days == 0 { 3 } else { recent_days };
        let retrieve_limit = if retrieve_limit == 0 { 10 } else { retrieve_limit };

        let mut parts = Vec::new();

        let mut used_retrieval = false;
        if !query.trim().is_empty() {
            let retrieved = self.retrieve(query, retrieve_limit);
            if !retrieved.is_empty() {
                parts.push(format!("## Long-term Memory (relevant)\n\n{retrieved}"));
                used_retrieval = true;
            }
        }
        if !used_retrieval {
            let long_term = self.read_long_term();
            if !long_term.is_empty() {
                parts.push(format!("## Long-term Memory\n\n{long_term}"));
            }
        }

        let recent_notes = self.get_recent_daily_notes(recent_days);
        if !recent_notes.is_empty() {
            parts.push(format!("## Recent Daily Notes\n\n{recent_notes}"));
        }

        if parts.is_empty() {
            return String::new();
        }
        format!("# Memory\n\n{}", parts.join("\n\n---\n\n"))
    }

    /// Write a policy snapshot to `memory/policy_snapshots/` so overrides
    /// mutations can be rolled back.
    pub fn save_policy_snapshot(&self, config_json: &[u8]) -> Result<()> {
        let dir = self.policy_snapshots_dir();
        fs::create_dir_all(&dir)?;
        let name = format!("{}.json", Utc::now().format("%Y%m%d_%H%M%S"));
        fs::write(dir.join(name), config_json)?;
        Ok(())
    }

    /// Whether long-term compression should run: the file exceeds the
    /// threshold and none has run within the last ~24 hours.
    pub fn compression_due(&self, char_threshold: usize) -> bool {
        if char_threshold == 0 {
            return false;
        }
        if self.read_long_term().chars().count() <= char_threshold {
            return false;
        }
        match fs::metadata(self.compress_sentinel()).and_then(|m| m.modified()) {
            Ok(modified) => match modified.elapsed() {
                Ok(age) => age >= std::time::Duration::from_secs(24 * 60 * 60),
                Err(_) => false,
            },
            Err(_) => true,
        }
    }

    /// Record that a compression pass ran now.
    pub fn mark_compressed(&self) -> Result<()> {
        debug!(path = ?self.compress_sentinel(), "updating compression sentinel");
        fs::write(self.compress_sentinel(), Utc::now().to_rfc3339())?;
        Ok(())
    }

    /// The long-term memory file path (used by the write-file reroute).
    pub fn long_term_path(&self) -> &Path {
        &self.memory_file
    }
}

/// Format a memory entry so retrieval splits it as one chunk:
/// `## YYYY-MM-DD` (UTC) followed by the trimmed content.
pub fn normalize_long_term_entry(content: &str) -> String {
    let s = content.trim();
    if s.is_empty() {
        return String::new();
    }
    format!("## {}\n\n{}", Utc::now().format("%Y-%m-%d"), s)
}

/// Split memory content into chunks: first at `## ` heading boundaries,
/// then at blank-line paragraph breaks. Falls back to the raw text as a
/// single chunk when nothing survives the split.
fn split_memory_chunks(content: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    for block in content.split("\n## ") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        for para in block.split("\n\n") {
            let para = para.trim();
            if !para.is_empty() {
                chunks.push(para.to_string());
            }
        }
    }
    if chunks.is_empty() && !content.trim().is_empty() {
        chunks.push(content.to_string());
    }
    chunks
}

/// Extract lowercase words (len >= 2) for scoring. Splits on anything
/// outside ASCII `a-z`.
pub(crate) fn tokenize_for_match(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_ascii_lowercase())
        .filter(|w| w.len() >= 2)
        .map(String::from)
        .collect()
}

/// Score a chunk against the query: +10 for a whole-query substring
/// match, +1 for each distinct query word present.
pub(crate) fn score_chunk(chunk: &str, query_lower: &str, query_words: &[String]) -> i32 {
    let chunk_lower = chunk.to_lowercase();
    let mut score = 0;
    if !query_lower.is_empty() && chunk_lower.contains(query_lower) {
        score += 10;
    }
    for w in query_words {
        if chunk_lower.contains(w.as_str()) {
            score += 1;
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_prefers_headings_then_paragraphs() {
        let chunks = split_memory_chunks("## A\nline one\n\nline two\n## B\nother");
        assert_eq!(chunks, vec!["## A\nline one", "line two", "B\nother"]);
    }

    #[test]
    fn test_split_falls_back_to_raw() {
        let chunks = split_memory_chunks("\n\n  \n\n");
        assert!(chunks.is_empty());
        let chunks = split_memory_chunks("plain");
        assert_eq!(chunks, vec!["plain"]);
    }

    #[test]
    fn test_tokenize_drops_short_and_non_ascii() {
        let words = tokenize_for_match("a big, dog! x 猫");
        assert_eq!(words, vec!["big", "dog"]);
    }

    #[test]
    fn test_score_substring_plus_words() {
        let words = tokenize_for_match("alice likes");
        assert_eq!(score_chunk("Alice likes tea", "alice likes", &words), 12);
        assert_eq!(score_chunk("alice only", "alice likes", &words), 1);
        assert_eq!(score_chunk("nothing here", "alice likes", &words), 0);
    }
}
