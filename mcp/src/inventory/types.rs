//! Core types for the tool catalog.

use std::fmt;

use serde::{Deserialize, Serialize};
use toolbridge_protocol::ChatTool;

use crate::{
    core::config::Tool,
    error::{McpError, McpResult},
    transform::sanitize_input_schema,
};

/// Separator between connection id and tool name in model-facing names.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// Model-facing tool identifier: `{connection_id}__{tool_name}`.
///
/// Parsing splits on the first separator, so tool names may themselves
/// contain `__`; connection ids may not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedToolName {
    pub connection_id: String,
    pub tool_name: String,
}

impl NamespacedToolName {
    pub fn new(connection_id: impl Into<String>, tool_name: impl Into<String>) -> McpResult<Self> {
        let connection_id = connection_id.into();
        let tool_name = tool_name.into();
        if connection_id.is_empty() || connection_id.contains(TOOL_NAME_SEPARATOR) {
            return Err(McpError::InvalidToolName(format!(
                "connection id '{}' must be non-empty and must not contain '{}'",
                connection_id, TOOL_NAME_SEPARATOR
            )));
        }
        if tool_name.is_empty() {
            return Err(McpError::InvalidToolName(
                "tool name must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            connection_id,
            tool_name,
        })
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (connection_id, tool_name) = s.split_once(TOOL_NAME_SEPARATOR)?;
        if connection_id.is_empty() || tool_name.is_empty() {
            return None;
        }
        Some(Self {
            connection_id: connection_id.to_string(),
            tool_name: tool_name.to_string(),
        })
    }
}

impl fmt::Display for NamespacedToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.connection_id, TOOL_NAME_SEPARATOR, self.tool_name
        )
    }
}

/// One tool of one connected provider.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: NamespacedToolName,
    pub connection_name: String,
    pub tool: Tool,
}

impl CatalogEntry {
    /// Function definition with a sanitized parameter schema.
    pub fn to_chat_tool(&self) -> ChatTool {
        let description = self
            .tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .or_else(|| self.tool.title.clone());
        ChatTool::function(
            self.name.to_string(),
            description,
            sanitize_input_schema(&self.tool.input_schema),
        )
    }
}
