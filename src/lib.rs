//! toolbridge: connects a chat model to remote MCP tool providers.
//!
//! The heavy lifting lives in the member crates:
//! - `toolbridge-mcp`: connection manager, OAuth adapter, tool-calling loop
//! - `data-connector`: persisted connection rows and OAuth credentials
//! - `toolbridge-protocol`: chat-completion wire types
//!
//! This crate adds configuration loading, logging, an OpenAI-compatible
//! model backend, the OAuth callback listener and the CLI.

pub mod app;
pub mod callback;
pub mod cli;
pub mod config;
pub mod llm;
pub mod logging;

pub use app::App;
pub use config::AppConfig;
