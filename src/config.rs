//! Application configuration.
//!
//! One YAML document bundles the MCP connection manager settings, the storage
//! backend, the chat model endpoint and logging. Every section is optional.
//! The model API key may come from the environment instead of the file.

use std::path::Path;

use data_connector::StorageConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use toolbridge_mcp::McpConfig;

/// Environment variables consulted, in order, when `llm.api_key` is unset.
pub const API_KEY_ENV_VARS: [&str; 2] = ["TOOLBRIDGE_LLM_API_KEY", "OPENAI_API_KEY"];

pub const BASE_URL_ENV_VAR: &str = "TOOLBRIDGE_LLM_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `RUST_LOG` style directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load from a YAML file, or defaults when no path is given.
    /// Environment overrides are applied and the result validated.
    pub async fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path).await?,
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        // An empty document deserializes to unit, not to an empty map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if self.llm.api_key.is_none() {
            self.llm.api_key = API_KEY_ENV_VARS
                .iter()
                .filter_map(|var| std::env::var(var).ok())
                .find(|value| !value.trim().is_empty());
        }
        if let Ok(base_url) = std::env::var(BASE_URL_ENV_VAR) {
            if !base_url.trim().is_empty() {
                self.llm.base_url = base_url;
            }
        }
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.mcp
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.storage.validate().map_err(ConfigError::Invalid)?;
        let base = url::Url::parse(&self.llm.base_url)
            .map_err(|e| ConfigError::Invalid(format!("invalid llm.base_url: {}", e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "llm.base_url must be http(s), got '{}'",
                base.scheme()
            )));
        }
        Ok(())
    }
}
