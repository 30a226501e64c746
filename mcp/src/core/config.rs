//! MCP configuration types and utilities.
//!
//! Defines the connection manager's OAuth identity, transport preference,
//! deadlines, retry policy, and tool-loop defaults.

use std::{fmt, time::Duration};

pub use rmcp::model::{CallToolResult, JsonObject, Tool};
use serde::{Deserialize, Serialize};

use crate::error::{McpError, McpResult};

/// Transport kinds the negotiator can build, in the order tried by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Streamable HTTP (single endpoint, POST + optional SSE stream)
    Streamable,
    /// Legacy HTTP+SSE (GET event stream, POST message endpoint)
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Streamable => write!(f, "streamable"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpConfig {
    /// OAuth redirect URL registered for every provider.
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,

    /// Client name sent during dynamic client registration.
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Transport preference order; later kinds are fallbacks.
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub chat: ChatConfig,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            redirect_url: default_redirect_url(),
            client_name: default_client_name(),
            transports: default_transports(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl McpConfig {
    pub fn validate(&self) -> McpResult<()> {
        if self.transports.is_empty() {
            return Err(McpError::Config(
                "at least one transport kind is required".to_string(),
            ));
        }
        if self.chat.max_iterations == 0 {
            return Err(McpError::Config(
                "chat.max_iterations must be greater than 0".to_string(),
            ));
        }
        let redirect = url::Url::parse(&self.redirect_url)
            .map_err(|e| McpError::Config(format!("invalid redirect_url: {}", e)))?;
        if !matches!(redirect.scheme(), "http" | "https") {
            return Err(McpError::Config(format!(
                "redirect_url must be http(s), got '{}'",
                redirect.scheme()
            )));
        }
        Ok(())
    }
}

fn default_redirect_url() -> String {
    "http://localhost:3000/api/mcp/oauth/callback".to_string()
}

fn default_client_name() -> String {
    "toolbridge".to_string()
}

fn default_transports() -> Vec<TransportKind> {
    vec![TransportKind::Streamable, TransportKind::Sse]
}

/// Deadlines for provider and model calls, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_tool_call_secs")]
    pub tool_call_secs: u64,
    #[serde(default = "default_llm_secs")]
    pub llm_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            tool_call_secs: default_tool_call_secs(),
            llm_secs: default_llm_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn tool_call(&self) -> Duration {
        Duration::from_secs(self.tool_call_secs)
    }

    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_secs)
    }
}

fn default_connect_secs() -> u64 {
    30
}

fn default_tool_call_secs() -> u64 {
    60
}

fn default_llm_secs() -> u64 {
    120
}

/// Exponential backoff for transient connect failures.
///
/// `max_elapsed_ms = 0` means a single attempt.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff.
    pub fn disabled() -> Self {
        Self {
            max_elapsed_ms: 0,
            ..Default::default()
        }
    }
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_max_interval_ms() -> u64 {
    5_000
}

fn default_max_elapsed_ms() -> u64 {
    15_000
}

/// Defaults for the tool-calling loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: None,
            max_tokens: None,
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default maximum tool loop iterations (safety limit).
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_system_prompt() -> String {
    "You are a helpful assistant with access to tools provided by connected services. \
     Call a tool when it helps answer the user's request, using the exact tool name and \
     a JSON object that matches its parameter schema. When a tool returns an error, \
     explain the problem or try a different approach instead of repeating the same call."
        .to_string()
}
