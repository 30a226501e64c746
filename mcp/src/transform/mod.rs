//! Transformations between MCP data and model function-calling formats.
//!
//! - [`schema`]: tool input schemas into function parameters
//! - [`result`]: tool results into tool-message content

pub mod result;
pub mod schema;

pub use result::{call_result_to_json, is_error_result, render_tool_content};
pub use schema::{sanitize_input_schema, sanitize_schema};
