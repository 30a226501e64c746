//! Provider sessions and transport negotiation.
//!
//! A session is one transport-bound MCP client for one provider URL. The
//! connection manager only sees the [`McpSession`] trait, so the wire client
//! can be swapped for a scripted one in tests.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    config::{CallToolResult, JsonObject, Tool, TransportKind},
    oauth::OAuthClientProvider,
};
use crate::error::{McpError, McpResult};

/// How a session reacts to a provider that demands authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Start the authorization flow and capture its URL.
    Interactive,
    /// Use stored tokens only; never start a new authorization.
    TokenOnly,
}

#[async_trait]
pub trait McpSession: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Connect and run the MCP initialize handshake.
    ///
    /// Fails with [`McpError::AuthorizationRequired`] when the provider wants
    /// authorization; in [`AuthMode::Interactive`] the authorization URL has
    /// been handed to the OAuth provider by then.
    async fn open(&self, mode: AuthMode) -> McpResult<()>;

    /// Exchange an authorization code for tokens. Call [`McpSession::open`]
    /// afterwards to connect with them.
    async fn finish_auth(&self, authorization_code: &str) -> McpResult<()>;

    async fn list_tools(&self) -> McpResult<Vec<Tool>>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult>;

    async fn close(&self) -> McpResult<()>;
}

/// Builds sessions of a given transport kind.
///
/// `create` only constructs; it does no I/O. A construction failure makes the
/// negotiator try the next kind.
pub trait SessionFactory: Send + Sync {
    fn create(
        &self,
        kind: TransportKind,
        url: &str,
        provider: Arc<dyn OAuthClientProvider>,
    ) -> McpResult<Arc<dyn McpSession>>;
}

/// Picks the first transport kind that can be constructed for a URL.
pub struct TransportNegotiator {
    factory: Arc<dyn SessionFactory>,
    preference: Vec<TransportKind>,
}

impl TransportNegotiator {
    pub fn new(factory: Arc<dyn SessionFactory>, preference: Vec<TransportKind>) -> Self {
        Self {
            factory,
            preference,
        }
    }

    pub fn preference(&self) -> &[TransportKind] {
        &self.preference
    }

    pub fn negotiate(
        &self,
        url: &str,
        provider: Arc<dyn OAuthClientProvider>,
    ) -> McpResult<Arc<dyn McpSession>> {
        let mut failures = Vec::new();
        for kind in &self.preference {
            match self.factory.create(*kind, url, provider.clone()) {
                Ok(session) => {
                    debug!(%url, transport = %kind, "Negotiated transport");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(%url, transport = %kind, error = %e, "Transport unavailable, trying next");
                    failures.push(format!("{}: {}", kind, e));
                }
            }
        }
        Err(McpError::TransportConstruction(format!(
            "no transport could be constructed for {} ({})",
            url,
            failures.join("; ")
        )))
    }
}
