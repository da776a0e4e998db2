//! # picoclaw-session
//!
//! Conversation state keyed by `<channel>:<chat_id>` (or `openai:<user>`):
//! JSON persistence under `sessions/`, turn partitioning of the message
//! stream, and query-relevance-based subsetting for context building.

pub mod manager;
pub mod relevant;

pub use manager::{Session, SessionManager};
pub use relevant::{Turn, get_relevant_history, partition_turns, select_relevant_turns};
