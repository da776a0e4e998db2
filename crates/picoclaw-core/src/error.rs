use thiserror::Error;

/// Unified error type for the entire picoclaw runtime.
#[derive(Error, Debug)]
pub enum PicoError {
    // ── Agent errors ───────────────────────────────────────────
    #[error("agent error: {0}")]
    Agent(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    // ── Provider errors ────────────────────────────────────────
    #[error("llm provider error: {0}")]
    Provider(String),

    // ── Channel errors ─────────────────────────────────────────
    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    #[error("channel not connected: {0}")]
    ChannelNotConnected(String),

    #[error("e2e crypto error: {0}")]
    Crypto(String),

    // ── Memory / session errors ────────────────────────────────
    #[error("memory error: {0}")]
    Memory(String),

    #[error("session error: {0}")]
    Session(String),

    // ── Hook errors ────────────────────────────────────────────
    #[error("hook policy error: {0}")]
    HookPolicy(String),

    // ── Skills errors ──────────────────────────────────────────
    #[error("skill error: {0}")]
    Skill(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PicoError>;
