//! Tool-calling orchestration between a chat model and connected providers.
//!
//! A single [`ToolOrchestrator::chat`] turn sends the conversation plus the
//! live tool catalog to the model and runs any tool calls it asks for.
//! [`ToolOrchestrator::chat_with_tool_loop`] repeats turns until the model
//! answers without tool calls or the iteration bound is reached.
//!
//! Tool failures never abort a turn: each failed call becomes a tool message
//! whose content is `{"error": "..."}` so the model can react to it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use toolbridge_protocol::{ChatCompletionRequest, ChatMessage, ChatTool, Role, ToolCall};
use tracing::{debug, info, warn};

use super::{
    config::{ChatConfig, JsonObject},
    llm::LlmBackend,
    manager::ConnectionManager,
};
use crate::{
    error::{McpError, McpResult},
    inventory::CatalogEntry,
    transform::{is_error_result, render_tool_content},
};

/// Per-request overrides of [`ChatConfig`].
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Offer tools even right after a tool result.
    pub use_tools: bool,
    /// Bound on model turns. Zero is treated as one.
    pub max_iterations: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { content: String },
    Failure { error: String },
}

/// Result of one tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// Content of the tool message sent back to the model.
    pub fn content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { content } => content.clone(),
            ToolOutcome::Failure { error } => json!({ "error": error }).to_string(),
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            name: Some(self.tool_name.clone()),
            ..ChatMessage::tool(self.tool_call_id.as_str(), self.content())
        }
    }
}

/// One model reply, plus the results of the tool calls it requested.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub message: ChatMessage,
    pub tool_results: Option<Vec<ToolResult>>,
}

#[derive(Debug, Clone)]
pub struct ToolLoopOutcome {
    /// Full transcript, system prompt and final answer included.
    pub messages: Vec<ChatMessage>,
    pub final_message: ChatMessage,
    pub iterations: usize,
}

/// A failed tool loop, with the transcript accumulated up to the failure.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ToolLoopError {
    #[source]
    pub source: McpError,
    pub transcript: Vec<ChatMessage>,
}

impl ToolLoopError {
    pub fn is_iteration_bound(&self) -> bool {
        matches!(self.source, McpError::IterationBoundExceeded(_))
    }
}

pub struct ToolOrchestrator {
    manager: Arc<ConnectionManager>,
    llm: Arc<dyn LlmBackend>,
}

impl ToolOrchestrator {
    pub fn new(manager: Arc<ConnectionManager>, llm: Arc<dyn LlmBackend>) -> Self {
        Self { manager, llm }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    fn chat_config(&self) -> &ChatConfig {
        &self.manager.config().chat
    }

    /// Function definitions for every tool of every connected provider.
    pub fn tool_definitions(&self) -> Vec<ChatTool> {
        self.manager
            .get_all_tools()
            .iter()
            .map(CatalogEntry::to_chat_tool)
            .collect()
    }

    /// One model turn. Tool calls in the reply are executed in order.
    pub async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> McpResult<ChatTurn> {
        self.run_turn(messages, options, true).await
    }

    async fn run_turn(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        execute_tools: bool,
    ) -> McpResult<ChatTurn> {
        let messages: Vec<ChatMessage> = messages.iter().map(ChatMessage::to_protocol).collect();

        let after_tool_result = messages.last().is_some_and(|m| m.role == Role::Tool);
        let tools = if after_tool_result && !options.use_tools {
            None
        } else {
            let definitions = self.tool_definitions();
            (!definitions.is_empty()).then_some(definitions)
        };

        let config = self.chat_config();
        let request = ChatCompletionRequest {
            model: options.model.clone().unwrap_or_else(|| config.model.clone()),
            messages,
            tools,
            temperature: options.temperature.or(config.temperature),
            max_tokens: options.max_tokens.or(config.max_tokens),
        };
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Sending chat request"
        );

        let timeout = self.manager.config().timeouts.llm();
        let message = match tokio::time::timeout(timeout, self.llm.complete(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(McpError::Timeout(format!(
                    "model reply after {}s",
                    timeout.as_secs()
                )))
            }
        };

        if !execute_tools || !message.has_tool_calls() {
            return Ok(ChatTurn {
                message,
                tool_results: None,
            });
        }

        let mut results = Vec::with_capacity(message.tool_calls.len());
        for call in &message.tool_calls {
            results.push(self.execute_tool_call(call).await);
        }
        Ok(ChatTurn {
            message,
            tool_results: Some(results),
        })
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> ToolResult {
        let name = call.function.name.as_str();
        let outcome = match parse_arguments(&call.function.arguments) {
            Err(e) => ToolOutcome::Failure {
                error: e.to_string(),
            },
            Ok(arguments) => match self.manager.call_tool(name, Some(arguments)).await {
                Ok(result) if is_error_result(&result) => ToolOutcome::Failure {
                    error: render_tool_content(&result),
                },
                Ok(result) => ToolOutcome::Success {
                    content: render_tool_content(&result),
                },
                Err(e) => ToolOutcome::Failure {
                    error: e.to_string(),
                },
            },
        };

        if let ToolOutcome::Failure { error } = &outcome {
            warn!(tool = %name, call_id = %call.id, %error, "Tool call failed");
        } else {
            debug!(tool = %name, call_id = %call.id, "Tool call succeeded");
        }

        ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: name.to_string(),
            outcome,
        }
    }

    /// Run turns until the model answers without tool calls.
    ///
    /// A system prompt is prepended when the conversation has none. The turn
    /// that reaches the bound is not followed by tool execution; if it still
    /// asks for tools the loop fails with [`McpError::IterationBoundExceeded`].
    pub async fn chat_with_tool_loop(
        &self,
        messages: Vec<ChatMessage>,
        options: &ChatOptions,
    ) -> Result<ToolLoopOutcome, ToolLoopError> {
        let mut transcript = messages;
        if !transcript.iter().any(|m| m.role == Role::System) {
            transcript.insert(0, ChatMessage::system(self.chat_config().system_prompt.clone()));
        }

        let max_iterations = options
            .max_iterations
            .unwrap_or(self.chat_config().max_iterations)
            .max(1);

        for iteration in 1..=max_iterations {
            let last_iteration = iteration == max_iterations;
            let turn = match self.run_turn(&transcript, options, !last_iteration).await {
                Ok(turn) => turn,
                Err(source) => return Err(ToolLoopError { source, transcript }),
            };

            let wants_tools = turn.message.has_tool_calls();
            transcript.push(turn.message.clone());

            if !wants_tools {
                info!(iterations = iteration, "Tool loop finished");
                return Ok(ToolLoopOutcome {
                    messages: transcript,
                    final_message: turn.message,
                    iterations: iteration,
                });
            }

            let results = turn.tool_results.unwrap_or_default();
            debug!(
                iteration,
                calls = results.len(),
                failed = results.iter().filter(|r| !r.is_success()).count(),
                "Tool loop iteration"
            );
            transcript.extend(results.iter().map(ToolResult::to_message));
        }

        warn!(max_iterations, "Tool loop reached its iteration bound");
        Err(ToolLoopError {
            source: McpError::IterationBoundExceeded(max_iterations),
            transcript,
        })
    }
}

/// Tool call arguments as a JSON object. Empty or `null` means no arguments.
fn parse_arguments(raw: &str) -> McpResult<JsonObject> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(McpError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(McpError::InvalidArguments(format!("malformed JSON: {}", e))),
    }
}
