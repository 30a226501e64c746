//! Rendering of provider tool results into tool-message content.

use serde_json::Value;
use tracing::warn;

use crate::core::config::CallToolResult;

/// Serialize the content blocks of a tool result.
pub fn call_result_to_json(result: &CallToolResult) -> Value {
    serde_json::to_value(&result.content).unwrap_or_else(|e| {
        warn!(
            "Failed to serialize CallToolResult to JSON: {}. Falling back to empty array.",
            e
        );
        Value::Array(Vec::new())
    })
}

/// Text for the model: plain text blocks are joined with newlines, anything
/// else (images, embedded resources) is passed as JSON.
pub fn render_tool_content(result: &CallToolResult) -> String {
    let content = call_result_to_json(result);
    let Value::Array(blocks) = &content else {
        return content.to_string();
    };

    let texts: Option<Vec<&str>> = blocks
        .iter()
        .map(|block| match (block.get("type"), block.get("text")) {
            (Some(Value::String(kind)), Some(Value::String(text))) if kind == "text" => {
                Some(text.as_str())
            }
            _ => None,
        })
        .collect();

    match texts {
        Some(texts) => texts.join("\n"),
        None => content.to_string(),
    }
}

pub fn is_error_result(result: &CallToolResult) -> bool {
    result.is_error.unwrap_or(false)
}
