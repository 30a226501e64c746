//! Model Context Protocol (MCP) tool-provider client.
//!
//! ## Modules
//!
//! - [`core`]: connection manager, OAuth client, transports, tool loop
//! - [`inventory`]: namespaced tool names and catalog entries
//! - [`transform`]: schema sanitizing and tool result rendering

pub mod error;
pub mod transform;

// Subsystems
pub mod core;
pub mod inventory;

pub use self::core::{config, manager, orchestrator};
pub use self::core::{
    AuthMode, AuthorizationServerMetadata, CallToolResult, ChatConfig, ChatOptions, ChatTurn,
    ConnectOutcome, ConnectionInfo, ConnectionManager, ConnectionSummary, CredentialScope,
    JsonObject, LlmBackend, McpConfig, McpSession, OAuthClientMetadata, OAuthClientProvider,
    OAuthFlow, PkceChallenge, RecoveryOutcome, RetryConfig, RetryPolicy, RmcpSession,
    RmcpSessionFactory, SessionFactory, StoreOAuthProvider, TimeoutConfig, Tool, ToolLoopError,
    ToolLoopOutcome, ToolOrchestrator, ToolOutcome, ToolResult, TransportKind,
    TransportNegotiator, DEFAULT_MAX_ITERATIONS,
};
pub use error::{McpError, McpResult};
pub use inventory::{CatalogEntry, NamespacedToolName, TOOL_NAME_SEPARATOR};
pub use transform::{render_tool_content, sanitize_schema};
