//! # picoclaw-core
//!
//! Core types, errors, and tool primitives for the picoclaw agent runtime.
//! This crate defines the shared vocabulary used by every other crate in
//! the workspace.

pub mod error;
pub mod message;
pub mod tool;

pub use error::{PicoError, Result};
pub use message::{Message, Role, ToolCall};
pub use tool::{Tool, ToolResult, ToolSpec};
