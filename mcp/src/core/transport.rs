//! rmcp-backed provider sessions over streamable HTTP and legacy SSE.

use std::{borrow::Cow, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use rmcp::{
    model::CallToolRequestParam,
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        SseClientTransport, StreamableHttpClientTransport,
    },
    RoleClient, ServiceExt,
};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    config::{CallToolResult, JsonObject, Tool, TransportKind},
    oauth::{OAuthClientProvider, OAuthFlow},
    session::{AuthMode, McpSession, SessionFactory},
};
use crate::error::{McpError, McpResult};

type McpClient = RunningService<RoleClient, ()>;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds [`RmcpSession`]s sharing one HTTP client for auth probes and OAuth.
pub struct RmcpSessionFactory {
    http: reqwest::Client,
}

impl RmcpSessionFactory {
    pub fn new() -> McpResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| McpError::TransportConstruction(format!("build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

impl SessionFactory for RmcpSessionFactory {
    fn create(
        &self,
        kind: TransportKind,
        url: &str,
        provider: Arc<dyn OAuthClientProvider>,
    ) -> McpResult<Arc<dyn McpSession>> {
        let parsed = url::Url::parse(url)
            .map_err(|e| McpError::TransportConstruction(format!("invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(McpError::TransportConstruction(format!(
                "{} transport needs an http(s) URL, got '{}'",
                kind,
                parsed.scheme()
            )));
        }
        Ok(Arc::new(RmcpSession {
            kind,
            url: url.to_string(),
            http: self.http.clone(),
            oauth: OAuthFlow::with_client(self.http.clone()),
            provider,
            client: RwLock::new(None),
        }))
    }
}

pub struct RmcpSession {
    kind: TransportKind,
    url: String,
    http: reqwest::Client,
    oauth: OAuthFlow,
    provider: Arc<dyn OAuthClientProvider>,
    client: RwLock<Option<McpClient>>,
}

impl RmcpSession {
    async fn connect(&self, bearer: Option<&str>) -> McpResult<McpClient> {
        match self.kind {
            TransportKind::Streamable => {
                let transport = if let Some(tok) = bearer {
                    let mut cfg = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
                    cfg.auth_header = Some(tok.to_string());
                    StreamableHttpClientTransport::from_config(cfg)
                } else {
                    StreamableHttpClientTransport::from_uri(self.url.as_str())
                };

                ().serve(transport).await.map_err(|e| {
                    McpError::ProviderUnreachable(format!("initialize streamable client: {}", e))
                })
            }
            TransportKind::Sse => {
                let client = Self::sse_http_client(bearer)?;
                let cfg = SseClientConfig {
                    sse_endpoint: self.url.clone().into(),
                    ..Default::default()
                };

                let transport = SseClientTransport::start_with_client(client, cfg)
                    .await
                    .map_err(|e| {
                        McpError::ProviderUnreachable(format!("create SSE transport: {}", e))
                    })?;

                ().serve(transport).await.map_err(|e| {
                    McpError::ProviderUnreachable(format!("initialize SSE client: {}", e))
                })
            }
        }
    }

    fn sse_http_client(bearer: Option<&str>) -> McpResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder().connect_timeout(PROBE_TIMEOUT);
        if let Some(tok) = bearer {
            let mut headers = header::HeaderMap::new();
            headers.insert(
                header::AUTHORIZATION,
                format!("Bearer {}", tok)
                    .parse()
                    .map_err(|e| McpError::TransportConstruction(format!("auth token: {}", e)))?,
            );
            builder = builder.default_headers(headers);
        }
        builder
            .build()
            .map_err(|e| McpError::TransportConstruction(format!("build HTTP client: {}", e)))
    }

    /// Whether the provider rejects us with 401 for the given bearer token.
    async fn requires_authorization(&self, bearer: Option<&str>) -> bool {
        let request = match self.kind {
            TransportKind::Streamable => self.http.post(&self.url).json(&json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": {"name": "toolbridge", "version": env!("CARGO_PKG_VERSION")}
                }
            })),
            TransportKind::Sse => self.http.get(&self.url),
        }
        .header(header::ACCEPT, "application/json, text/event-stream");

        let request = match bearer {
            Some(tok) => request.bearer_auth(tok),
            None => request,
        };

        match request.send().await {
            Ok(response) => response.status() == StatusCode::UNAUTHORIZED,
            Err(e) => {
                debug!(url = %self.url, error = %e, "Authorization probe failed");
                false
            }
        }
    }

    async fn install(&self, client: McpClient) {
        let previous = self.client.write().await.replace(client);
        if let Some(previous) = previous {
            if let Err(e) = previous.cancel().await {
                warn!(url = %self.url, error = %e, "Error closing replaced client");
            }
        }
    }
}

#[async_trait]
impl McpSession for RmcpSession {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(&self, mode: AuthMode) -> McpResult<()> {
        let bearer = self.provider.tokens().await?.map(|t| t.access_token);

        let error = match self.connect(bearer.as_deref()).await {
            Ok(client) => {
                self.install(client).await;
                info!(url = %self.url, transport = %self.kind, "Connected to MCP provider");
                return Ok(());
            }
            Err(e) => e,
        };

        if !self.requires_authorization(bearer.as_deref()).await {
            return Err(error);
        }

        if bearer.is_some() {
            match self.oauth.refresh(&self.url, self.provider.as_ref()).await {
                Ok(Some(tokens)) => {
                    if let Ok(client) = self.connect(Some(&tokens.access_token)).await {
                        self.install(client).await;
                        info!(url = %self.url, "Connected to MCP provider after token refresh");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(url = %self.url, error = %e, "Token refresh failed"),
            }
        }

        if mode == AuthMode::Interactive {
            self.oauth
                .start_authorization(&self.url, self.provider.as_ref())
                .await?;
            info!(
                url = %self.url,
                connection_id = %self.provider.connection_id(),
                "Provider requires authorization"
            );
        }
        Err(McpError::AuthorizationRequired(self.url.clone()))
    }

    async fn finish_auth(&self, authorization_code: &str) -> McpResult<()> {
        self.oauth
            .exchange_code(&self.url, self.provider.as_ref(), authorization_code)
            .await
            .map(|_| ())
    }

    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| McpError::ProviderProtocol(format!("session for {} is not open", self.url)))?;
        client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| McpError::ProviderProtocol(format!("list tools: {}", e)))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| McpError::ProviderProtocol(format!("session for {} is not open", self.url)))?;
        let request = CallToolRequestParam {
            name: Cow::Owned(name.to_string()),
            arguments,
        };
        client
            .call_tool(request)
            .await
            .map_err(|e| McpError::ToolExecution(format!("MCP call failed: {}", e)))
    }

    async fn close(&self) -> McpResult<()> {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            client
                .cancel()
                .await
                .map_err(|e| McpError::ProviderProtocol(format!("close session: {}", e)))?;
            debug!(url = %self.url, "Closed MCP session");
        }
        Ok(())
    }
}
