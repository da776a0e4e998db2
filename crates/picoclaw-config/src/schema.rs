use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration — maps to `picoclaw.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PicoConfig {
    pub agent: AgentDefaults,
    pub provider: ProviderConfig,
    pub memory: MemoryConfig,
    pub channels: ChannelsConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

impl Default for PicoConfig {
    fn default() -> Self {
        Self {
            agent: AgentDefaults::default(),
            provider: ProviderConfig::default(),
            memory: MemoryConfig::default(),
            channels: ChannelsConfig::default(),
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ── Provider ───────────────────────────────────────────────────

/// The OpenAI-compatible backend the runtime talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base: String,
    /// API key; the `OPENROUTER_API_KEY` environment variable overrides.
    pub api_key: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://openrouter.ai/api/v1".into(),
            api_key: String::new(),
        }
    }
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Primary model identifier, e.g. "anthropic/claude-sonnet-4".
    pub model: String,
    /// Fallback model identifiers tried in order after the primary fails.
    pub model_fallbacks: Vec<String>,
    /// Workspace root for memory, sessions, hooks, and skills.
    pub workspace: PathBuf,
    /// Maximum agent loop iterations before forcing a stop.
    pub max_tool_iterations: u32,
    /// Context window size in tokens for summarization accounting.
    pub context_window: usize,
    /// Maximum wall-clock seconds per turn. The loop stops cooperatively
    /// at the deadline; an in-flight tool is never cut off. 0 disables.
    pub request_timeout_secs: u64,
    /// Restrict file tools to the workspace.
    pub restrict_to_workspace: bool,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".into(),
            model_fallbacks: vec![],
            workspace: PathBuf::from("~/.picoclaw/workspace"),
            max_tool_iterations: 20,
            context_window: 200_000,
            request_timeout_secs: 300,
            restrict_to_workspace: true,
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

/// Static memory policy knobs. Workspace `memory/policy_overrides.json`
/// takes precedence for every field it sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Max chunks returned by query-based retrieval.
    pub retrieve_limit: u32,
    /// Daily notes window folded into the memory context.
    pub recent_days: u32,
    /// Summarize the session when its message count exceeds this.
    pub session_summary_message_threshold: u32,
    /// Summarize when the estimated tokens exceed this percent of the
    /// context window.
    pub session_summary_token_percent: u32,
    /// Messages kept verbatim when the session is archived to a summary.
    pub session_summary_keep_count: u32,
    /// Max turns for query-based session history. 0 disables the feature.
    pub session_relevant_history_limit: u32,
    /// Last-N-messages fallback when no turn matches. None means 8;
    /// Some(0) means no history at all when nothing matches.
    pub session_relevant_fallback_keep: Option<u32>,
    /// Compress the long-term file when it exceeds this many chars.
    /// 0 disables compression.
    pub long_term_compress_char_threshold: u32,
    /// Allow the runtime to evolve policy overrides from reflection.
    pub evolution_enabled: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retrieve_limit: 10,
            recent_days: 3,
            session_summary_message_threshold: 20,
            session_summary_token_percent: 75,
            session_summary_keep_count: 4,
            session_relevant_history_limit: 0,
            session_relevant_fallback_keep: None,
            long_term_compress_char_threshold: 0,
            evolution_enabled: false,
        }
    }
}

// ── Channels ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub botschat: BotsChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotsChatConfig {
    pub enabled: bool,
    /// Cloud base URL; ws/wss scheme is derived from http/https.
    pub cloud_url: String,
    pub account_id: String,
    pub pairing_token: String,
    /// When set, an E2E key is derived after auth and messages are
    /// encrypted end to end.
    pub e2e_password: String,
    /// Allowed sender identifiers. Empty = allow all.
    pub allow_from: Vec<String>,
}

impl Default for BotsChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cloud_url: "https://chat.botschat.dev".into(),
            account_id: "default".into(),
            pairing_token: String::new(),
            e2e_password: String::new(),
            allow_from: vec![],
        }
    }
}

// ── Gateway ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub openai_api: OpenAIApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAIApiConfig {
    pub enabled: bool,
    /// Bind address for the HTTP gateway.
    pub bind: String,
    /// Bearer token allowlist; the endpoint rejects everything when empty.
    pub bearer_tokens: Vec<String>,
}

impl Default for OpenAIApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8089".into(),
            bearer_tokens: vec![],
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter, e.g. "info" or "picoclaw=debug".
    pub level: String,
    /// Directory for turn-observation JSONL files. Empty disables.
    pub observe_dir: String,
    /// Include full prompts in observation events.
    pub observe_full_prompt: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            observe_dir: String::new(),
            observe_full_prompt: false,
        }
    }
}
