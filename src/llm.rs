//! OpenAI-compatible chat completions backend.

use async_trait::async_trait;
use toolbridge_mcp::{LlmBackend, McpError, McpResult};
use toolbridge_protocol::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use tracing::debug;

use crate::config::LlmConfig;

pub struct OpenAiBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: &LlmConfig) -> McpResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| McpError::Llm(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, request: ChatCompletionRequest) -> McpResult<ChatMessage> {
        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| McpError::Llm(format!("request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Llm(format!(
                "model endpoint returned {}: {}",
                status,
                truncate(&body, 512)
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| McpError::Llm(format!("invalid completion body: {}", e)))?;
        debug!(id = %completion.id, usage = ?completion.usage, "Chat completion received");

        completion
            .into_first_message()
            .ok_or_else(|| McpError::Llm("completion has no choices".to_string()))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
