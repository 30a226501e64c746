//! MCP error types.
//!
//! One variant per failure kind the connection manager and the tool loop can
//! produce. Whether a kind is recovered or fatal is decided by the caller;
//! [`McpError::is_permanent`] only answers "is retrying pointless".

use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    /// Building a transport of one kind failed; the negotiator falls back.
    #[error("Transport construction failed: {0}")]
    TransportConstruction(String),

    /// The provider answered 401 and an authorization URL has been captured.
    #[error("Authorization required for {0}")]
    AuthorizationRequired(String),

    /// Authorization is required but no authorization URL was produced.
    #[error("Authorization required but no authorization URL was captured for connection {0}")]
    AuthorizationUnavailable(String),

    #[error("Provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Provider protocol error: {0}")]
    ProviderProtocol(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Iteration bound of {0} reached without a final answer")]
    IterationBoundExceeded(usize),

    #[error("No pending connection with id {0}")]
    PendingConnectionNotFound(String),

    #[error("No PKCE code verifier stored for connection {0}")]
    CodeVerifierMissing(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool name: {0}")]
    InvalidToolName(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("LLM backend error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] data_connector::StorageError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl McpError {
    /// Errors that will not go away by retrying the same operation.
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self,
            McpError::ProviderUnreachable(_) | McpError::Timeout(_) | McpError::Http(_)
        )
    }

    pub fn is_authorization_required(&self) -> bool {
        matches!(self, McpError::AuthorizationRequired(_))
    }

    /// Failures after which the stored credentials for the connection can no
    /// longer be trusted.
    pub fn purges_credentials(&self) -> bool {
        matches!(
            self,
            McpError::ProviderUnreachable(_) | McpError::ProviderProtocol(_) | McpError::OAuth(_)
        )
    }
}
