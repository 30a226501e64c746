//! Core MCP client infrastructure.

pub mod config;
pub mod llm;
pub mod manager;
pub mod oauth;
pub mod orchestrator;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use config::{
    CallToolResult, ChatConfig, JsonObject, McpConfig, RetryConfig, TimeoutConfig, Tool,
    TransportKind, DEFAULT_MAX_ITERATIONS,
};
pub use llm::LlmBackend;
pub use manager::{
    ConnectOutcome, ConnectionInfo, ConnectionManager, ConnectionSummary, RecoveryOutcome,
};
pub use oauth::{
    AuthorizationServerMetadata, CredentialScope, OAuthClientMetadata, OAuthClientProvider,
    OAuthFlow, PkceChallenge, StoreOAuthProvider,
};
pub use orchestrator::{
    ChatOptions, ChatTurn, ToolLoopError, ToolLoopOutcome, ToolOrchestrator, ToolOutcome,
    ToolResult,
};
pub use reconnect::RetryPolicy;
pub use session::{AuthMode, McpSession, SessionFactory, TransportNegotiator};
pub use transport::{RmcpSession, RmcpSessionFactory};
