//! Process-level configuration for the `accord` binary: HTTP bind settings,
//! default discussion options, and logging format.
//!
//! Loading follows the same precedence the wider `accord-*` stack uses
//! elsewhere: CLI flags override environment variables, which override the
//! config file, which overrides the built-in defaults. This module only
//! implements the file/default layer; CLI and env overlays are applied by
//! the binary after `AccordConfig::load()` returns.

use crate::DiscussionOptions;
use anyhow::Result;
use serde::{Deserialize, Serialize};

const CONFIG_PATH: &str = "accord.config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Root configuration object for the `accord` server process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccordConfig {
    pub server: ServerConfig,
    pub default_options: DiscussionOptions,
    pub log_format: LogFormat,
}

impl AccordConfig {
    /// Load from `accord.config.json` in the working directory, or write out
    /// and return the default configuration if the file does not exist yet.
    pub async fn load() -> Result<Self> {
        match tokio::fs::read_to_string(CONFIG_PATH).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", CONFIG_PATH, e)),
            Err(_) => {
                let default_config = Self::default();
                default_config.save().await?;
                Ok(default_config)
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(CONFIG_PATH, content).await?;
        Ok(())
    }
}
