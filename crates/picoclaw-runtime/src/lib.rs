//! # picoclaw-runtime
//!
//! The agent turn loop and its collaborators: system-prompt assembly,
//! the tool registry with built-in workspace and memory tools, lifecycle
//! hook emission, session summarization, and the turn observer.

pub mod agent_loop;
pub mod context;
pub mod observe;
pub mod tools;

pub use agent_loop::AgentLoop;
pub use context::{ContextBuilder, sanitize_history};
pub use tools::ToolRegistry;
