//! Chat-completion protocol definitions.
//!
//! Only the subset of the OpenAI-compatible chat API needed to drive a
//! tool-calling conversation: messages, tool calls, function tool
//! definitions, and the request/response envelopes.

pub mod chat;

pub use chat::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatTool,
    FunctionCall, FunctionDefinition, Role, ToolCall, ToolType, Usage,
};
