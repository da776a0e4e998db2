use std::path::{Path, PathBuf};
use tracing::{info, warn};

use picoclaw_core::{PicoError, Result};

use crate::schema::PicoConfig;

/// Loads the picoclaw configuration from disk.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve the config path: explicit path > PICOCLAW_CONFIG env >
    /// ~/.picoclaw/picoclaw.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("PICOCLAW_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".picoclaw")
            .join("picoclaw.toml")
    }

    /// Load the config from disk, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: Option<&Path>) -> Result<PicoConfig> {
        let config_path = Self::resolve_path(path);
        let mut config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<PicoConfig>(&raw).map_err(|e| {
                PicoError::Config(format!("failed to parse {}: {}", config_path.display(), e))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            PicoConfig::default()
        };

        config.agent.workspace = expand_home(&config.agent.workspace);
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY")
            && !key.is_empty()
        {
            config.provider.api_key = key;
        }
        Ok(config)
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    if s == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }
    path.to_path_buf()
}
