//! # picoclaw-memory
//!
//! Per-workspace long-term memory for the agent:
//!
//! - Long-term notes: `memory/MEMORY.md` (atomic writes, timestamped backups)
//! - Daily notes: `memory/YYYYMM/YYYYMMDD.md`
//! - Ranked keyword retrieval over heading/paragraph chunks
//! - Memory policy: config defaults merged with workspace
//!   `memory/policy_overrides.json`
//!
//! All date formatting uses UTC.

pub mod policy;
pub mod store;

pub use policy::{MemoryPolicy, PolicyOverrides};
pub use store::{MemoryStore, normalize_long_term_entry};
