//! # picoclaw-config
//!
//! Configuration for the picoclaw runtime, loaded from `picoclaw.toml`.
//! Workspace-level dynamism (memory policy overrides, hook policy) lives
//! in the workspace files, not here; this is the static boot-time view.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    AgentDefaults, BotsChatConfig, GatewayConfig, LoggingConfig, MemoryConfig, OpenAIApiConfig,
    PicoConfig, ProviderConfig,
};
