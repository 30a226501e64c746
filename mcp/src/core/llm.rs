//! Chat model backend used by the tool loop.

use async_trait::async_trait;
use toolbridge_protocol::{ChatCompletionRequest, ChatMessage};

use crate::error::McpResult;

/// One chat completion round trip. Implementations return the first choice's
/// message, tool calls included.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, request: ChatCompletionRequest) -> McpResult<ChatMessage>;
}
