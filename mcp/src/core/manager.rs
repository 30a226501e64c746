//! Connection manager for remote MCP tool providers.
//!
//! Owns two in-memory maps: live connections (connected, with their tool
//! lists) and pending connections (waiting for an OAuth callback). Connection
//! rows and OAuth credentials are persisted through the data connector so a
//! restarted process can recover its connections.
//!
//! Mutating operations on one connection id are serialized by a per-id async
//! lock. DashMap guards are never held across an await.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use data_connector::{
    ConnectionRecord, ConnectionStatus, ConnectionStorage, ConnectionUpsert, OAuthSessionStorage,
};
use futures::future::join_all;
use serde::{ser::SerializeMap, Serialize, Serializer};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    config::{CallToolResult, JsonObject, McpConfig, Tool},
    oauth::{OAuthClientProvider, StoreOAuthProvider},
    reconnect::RetryPolicy,
    session::{AuthMode, McpSession, SessionFactory, TransportNegotiator},
};
use crate::{
    error::{McpError, McpResult},
    inventory::{CatalogEntry, NamespacedToolName, TOOL_NAME_SEPARATOR},
};

/// Public view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub url: String,
    pub name: String,
    pub status: ConnectionStatus,
    pub tools: Vec<Tool>,
}

/// Result of [`ConnectionManager::connect`].
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Connected(ConnectionInfo),
    /// The user must visit `authorization_url`, then the callback completes
    /// the connection via [`ConnectionManager::complete_oauth_connection`].
    NeedsAuth {
        connection_id: String,
        authorization_url: String,
    },
}

impl ConnectOutcome {
    pub fn needs_auth(&self) -> bool {
        matches!(self, ConnectOutcome::NeedsAuth { .. })
    }

    pub fn connection_id(&self) -> &str {
        match self {
            ConnectOutcome::Connected(info) => &info.id,
            ConnectOutcome::NeedsAuth { connection_id, .. } => connection_id,
        }
    }
}

impl Serialize for ConnectOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConnectOutcome::Connected(info) => {
                let mut map = serializer.serialize_map(Some(6))?;
                map.serialize_entry("needsAuth", &false)?;
                map.serialize_entry("id", &info.id)?;
                map.serialize_entry("url", &info.url)?;
                map.serialize_entry("name", &info.name)?;
                map.serialize_entry("status", &info.status)?;
                map.serialize_entry("tools", &info.tools)?;
                map.end()
            }
            ConnectOutcome::NeedsAuth {
                connection_id,
                authorization_url,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("needsAuth", &true)?;
                map.serialize_entry("authorizationUrl", authorization_url)?;
                map.serialize_entry("connectionId", connection_id)?;
                map.end()
            }
        }
    }
}

/// Row of [`ConnectionManager::list_connections`].
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub url: String,
    pub name: String,
    pub status: ConnectionStatus,
    pub tool_count: usize,
}

/// Per-row result of [`ConnectionManager::reconnect_saved_connections`].
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    pub id: String,
    pub name: String,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct LiveConnection {
    info: ConnectionInfo,
    session: Arc<dyn McpSession>,
    /// Registration order, keeps the tool catalog stable.
    seq: u64,
}

struct PendingConnection {
    url: String,
    name: String,
    session: Arc<dyn McpSession>,
}

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive hold on one connection id. The map entry goes away with the
/// last task that holds or waits on it.
struct IdGuard {
    id: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one means only the map
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct ConnectionManager {
    connections: DashMap<String, LiveConnection>,
    pending: DashMap<String, PendingConnection>,
    locks: Arc<LockMap>,
    sequence: AtomicU64,
    negotiator: TransportNegotiator,
    credentials: Arc<dyn OAuthSessionStorage>,
    rows: Arc<dyn ConnectionStorage>,
    retry: RetryPolicy,
    config: McpConfig,
}

impl ConnectionManager {
    pub fn new(
        config: McpConfig,
        factory: Arc<dyn SessionFactory>,
        credentials: Arc<dyn OAuthSessionStorage>,
        rows: Arc<dyn ConnectionStorage>,
    ) -> McpResult<Self> {
        config.validate()?;
        Ok(Self {
            connections: DashMap::new(),
            pending: DashMap::new(),
            locks: Arc::new(DashMap::new()),
            sequence: AtomicU64::new(0),
            negotiator: TransportNegotiator::new(factory, config.transports.clone()),
            credentials,
            rows,
            retry: RetryPolicy::from_config(&config.retry),
            config,
        })
    }

    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    /// OAuth provider for one connection id, backed by the credential store.
    pub fn oauth_provider(&self, connection_id: &str) -> Arc<dyn OAuthClientProvider> {
        Arc::new(StoreOAuthProvider::new(
            connection_id,
            self.config.redirect_url.as_str(),
            self.config.client_name.as_str(),
            self.credentials.clone(),
        ))
    }

    async fn lock_id(&self, id: &str) -> IdGuard {
        let lock = Arc::clone(
            self.locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        IdGuard {
            id: id.to_string(),
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    // ========================================================================
    // Connect
    // ========================================================================

    /// Connect to a provider. Returns either the connected provider with its
    /// tools, or the authorization URL the user must visit.
    ///
    /// Failures other than "authorization required" leave no trace: the
    /// credential record and the connection row are removed.
    pub async fn connect(&self, url: &str, name: Option<&str>) -> McpResult<ConnectOutcome> {
        let url = url.trim();
        let id = Uuid::new_v4().to_string();
        debug_assert!(!id.contains(TOOL_NAME_SEPARATOR));
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_name(url));

        let _guard = self.lock_id(&id).await;
        info!(connection_id = %id, %url, %name, "Connecting to MCP provider");

        let provider = self.oauth_provider(&id);
        let session = match self.negotiator.negotiate(url, provider.clone()) {
            Ok(session) => session,
            Err(e) => {
                self.purge(&id).await;
                return Err(e);
            }
        };

        match self.open_session(&id, &session, AuthMode::Interactive).await {
            Ok(()) => {}
            Err(McpError::AuthorizationRequired(_)) => {
                return self.park_pending(id, url, name, session, provider).await;
            }
            Err(e) => {
                warn!(connection_id = %id, %url, error = %e, "Connect failed");
                self.discard(&id, &session).await;
                return Err(e);
            }
        }

        let registered = async {
            let tools = self.fetch_tools(&session).await?;
            self.rows
                .upsert_connection(ConnectionUpsert::new(
                    &id,
                    url,
                    &name,
                    ConnectionStatus::Connected,
                ))
                .await?;
            Ok::<_, McpError>(tools)
        }
        .await;

        match registered {
            Ok(tools) => {
                let info = self.register(id, url.to_string(), name, tools, session);
                info!(
                    connection_id = %info.id,
                    tools = info.tools.len(),
                    "Connected to MCP provider"
                );
                Ok(ConnectOutcome::Connected(info))
            }
            Err(e) => {
                warn!(connection_id = %id, error = %e, "Connect failed after handshake");
                self.discard(&id, &session).await;
                Err(e)
            }
        }
    }

    async fn park_pending(
        &self,
        id: String,
        url: &str,
        name: String,
        session: Arc<dyn McpSession>,
        provider: Arc<dyn OAuthClientProvider>,
    ) -> McpResult<ConnectOutcome> {
        let authorization_url = match provider.take_authorization_url().await {
            Ok(Some(authorization_url)) => authorization_url,
            Ok(None) => {
                warn!(connection_id = %id, "Authorization required but no URL was captured");
                self.discard(&id, &session).await;
                return Err(McpError::AuthorizationUnavailable(id));
            }
            Err(e) => {
                self.discard(&id, &session).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .rows
            .upsert_connection(ConnectionUpsert::new(
                &id,
                url,
                &name,
                ConnectionStatus::PendingAuth,
            ))
            .await
        {
            self.discard(&id, &session).await;
            return Err(e.into());
        }

        self.pending.insert(
            id.clone(),
            PendingConnection {
                url: url.to_string(),
                name,
                session,
            },
        );
        info!(connection_id = %id, "Connection awaiting authorization");
        Ok(ConnectOutcome::NeedsAuth {
            connection_id: id,
            authorization_url,
        })
    }

    /// Finish a pending connection with the code from the OAuth callback.
    ///
    /// The pending entry is consumed either way; on failure the credential
    /// record and the connection row are removed as well.
    pub async fn complete_oauth_connection(
        &self,
        connection_id: &str,
        authorization_code: &str,
    ) -> McpResult<ConnectionInfo> {
        let _guard = self.lock_id(connection_id).await;
        let Some((_, pending)) = self.pending.remove(connection_id) else {
            return Err(McpError::PendingConnectionNotFound(
                connection_id.to_string(),
            ));
        };

        let connect_timeout = self.config.timeouts.connect();
        let completed = async {
            match tokio::time::timeout(
                connect_timeout,
                pending.session.finish_auth(authorization_code),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(McpError::Timeout(format!(
                        "code exchange after {}s",
                        connect_timeout.as_secs()
                    )))
                }
            }
            self.open_session(connection_id, &pending.session, AuthMode::TokenOnly)
                .await?;
            let tools = self.fetch_tools(&pending.session).await?;
            self.rows
                .upsert_connection(ConnectionUpsert::new(
                    connection_id,
                    &pending.url,
                    &pending.name,
                    ConnectionStatus::Connected,
                ))
                .await?;
            Ok::<_, McpError>(tools)
        }
        .await;

        match completed {
            Ok(tools) => {
                let info = self.register(
                    connection_id.to_string(),
                    pending.url,
                    pending.name,
                    tools,
                    pending.session,
                );
                info!(
                    connection_id = %info.id,
                    tools = info.tools.len(),
                    "Authorization completed, provider connected"
                );
                Ok(info)
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Completing authorization failed");
                self.discard(connection_id, &pending.session).await;
                Err(e)
            }
        }
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Re-establish every persisted connection that has stored tokens.
    ///
    /// Rows are recovered concurrently and independently; a failing row is
    /// marked disconnected and never affects the others. Only a failure to
    /// read the row list is returned as an error.
    pub async fn reconnect_saved_connections(&self) -> McpResult<Vec<RecoveryOutcome>> {
        let rows = self.rows.list_connections().await?;
        info!(count = rows.len(), "Recovering saved connections");
        let outcomes = join_all(rows.into_iter().map(|row| self.recover(row))).await;
        let connected = outcomes
            .iter()
            .filter(|o| o.status == ConnectionStatus::Connected)
            .count();
        info!(
            connected,
            total = outcomes.len(),
            "Connection recovery finished"
        );
        Ok(outcomes)
    }

    async fn recover(&self, row: ConnectionRecord) -> RecoveryOutcome {
        let _guard = self.lock_id(&row.id).await;

        let current = self
            .connections
            .get(&row.id)
            .map(|live| live.info.status)
            .or_else(|| {
                self.pending
                    .contains_key(&row.id)
                    .then_some(ConnectionStatus::PendingAuth)
            });
        if let Some(status) = current {
            return RecoveryOutcome {
                id: row.id,
                name: row.name,
                status,
                error: None,
            };
        }

        let (status, error) = match self.try_recover(&row).await {
            Ok(()) => (ConnectionStatus::Connected, None),
            Err(e) => {
                warn!(connection_id = %row.id, url = %row.url, error = %e, "Recovery failed, marking disconnected");
                (ConnectionStatus::Disconnected, Some(e.to_string()))
            }
        };

        if let Err(e) = self.rows.update_connection_status(&row.id, status).await {
            warn!(connection_id = %row.id, error = %e, "Failed to persist recovered status");
        }

        RecoveryOutcome {
            id: row.id,
            name: row.name,
            status,
            error,
        }
    }

    async fn try_recover(&self, row: &ConnectionRecord) -> McpResult<()> {
        let provider = self.oauth_provider(&row.id);
        if provider.tokens().await?.is_none() {
            debug!(connection_id = %row.id, "No stored tokens");
            return Err(McpError::AuthorizationRequired(row.url.clone()));
        }

        let session = self.negotiator.negotiate(&row.url, provider)?;
        let tools = async {
            self.open_session(&row.id, &session, AuthMode::TokenOnly)
                .await?;
            self.fetch_tools(&session).await
        }
        .await;

        match tools {
            Ok(tools) => {
                self.register(
                    row.id.clone(),
                    row.url.clone(),
                    row.name.clone(),
                    tools,
                    session,
                );
                info!(connection_id = %row.id, "Recovered connection");
                Ok(())
            }
            Err(e) => {
                self.close_quietly(&row.id, &session).await;
                if e.purges_credentials() {
                    // The row stays so the connection can be re-authorized
                    match self.credentials.delete_session(&row.id).await {
                        Ok(_) => info!(connection_id = %row.id, "Purged credentials after failed recovery"),
                        Err(err) => {
                            warn!(connection_id = %row.id, error = %err, "Failed to delete credentials")
                        }
                    }
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Disconnect / shutdown
    // ========================================================================

    /// Remove a connection everywhere: live or pending session, credential
    /// record, and persisted row. Returns whether anything was found.
    pub async fn disconnect(&self, connection_id: &str) -> McpResult<bool> {
        let _guard = self.lock_id(connection_id).await;

        let live = self
            .connections
            .remove(connection_id)
            .map(|(_, live)| live.session);
        let pending = self
            .pending
            .remove(connection_id)
            .map(|(_, pending)| pending.session);
        let in_memory = live.is_some() || pending.is_some();

        for session in live.into_iter().chain(pending) {
            self.close_quietly(connection_id, &session).await;
        }

        let persisted = match self.rows.get_connection(connection_id).await {
            Ok(row) => row.is_some(),
            // Unknown; attempt the deletes so their error is the one reported
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Failed to read connection row");
                true
            }
        };

        if !in_memory && !persisted {
            debug!(connection_id = %connection_id, "Disconnect: not found");
            return Ok(false);
        }

        self.credentials.delete_session(connection_id).await?;
        self.rows.delete_connection(connection_id).await?;

        info!(connection_id = %connection_id, "Disconnected");
        Ok(true)
    }

    /// Close every session. Persisted rows and credentials are kept so the
    /// next process can recover them.
    pub async fn shutdown(&self) {
        let live: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in live {
            if let Some((_, connection)) = self.connections.remove(&id) {
                self.close_quietly(&id, &connection.session).await;
            }
        }

        let pending: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in pending {
            if let Some((_, connection)) = self.pending.remove(&id) {
                self.close_quietly(&id, &connection.session).await;
            }
        }
        info!("Connection manager shut down");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Persisted connections, with tool counts for the live ones.
    pub async fn list_connections(&self) -> McpResult<Vec<ConnectionSummary>> {
        let rows = self.rows.list_connections().await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let (status, tool_count) = match self.connections.get(&row.id) {
                    Some(live) => (live.info.status, live.info.tools.len()),
                    None => (row.status, 0),
                };
                ConnectionSummary {
                    id: row.id,
                    url: row.url,
                    name: row.name,
                    status,
                    tool_count,
                }
            })
            .collect())
    }

    pub fn get_connection(&self, connection_id: &str) -> Option<ConnectionInfo> {
        if let Some(live) = self.connections.get(connection_id) {
            return Some(live.info.clone());
        }
        self.pending
            .get(connection_id)
            .map(|pending| ConnectionInfo {
                id: connection_id.to_string(),
                url: pending.url.clone(),
                name: pending.name.clone(),
                status: ConnectionStatus::PendingAuth,
                tools: Vec::new(),
            })
    }

    pub fn is_pending(&self, connection_id: &str) -> bool {
        self.pending.contains_key(connection_id)
    }

    /// Every tool of every connected provider, under its namespaced name.
    ///
    /// Computed from the registry on each call.
    pub fn get_all_tools(&self) -> Vec<CatalogEntry> {
        let mut grouped: Vec<(u64, Vec<CatalogEntry>)> = self
            .connections
            .iter()
            .filter(|live| live.info.status == ConnectionStatus::Connected)
            .map(|live| {
                let entries = live
                    .info
                    .tools
                    .iter()
                    .filter_map(|tool| {
                        NamespacedToolName::new(&live.info.id, tool.name.to_string())
                            .ok()
                            .map(|name| CatalogEntry {
                                name,
                                connection_name: live.info.name.clone(),
                                tool: tool.clone(),
                            })
                    })
                    .collect();
                (live.seq, entries)
            })
            .collect();
        grouped.sort_by_key(|(seq, _)| *seq);
        grouped.into_iter().flat_map(|(_, entries)| entries).collect()
    }

    /// Re-list a live connection's tools.
    pub async fn refresh_tools(&self, connection_id: &str) -> McpResult<Vec<Tool>> {
        let _guard = self.lock_id(connection_id).await;
        let session = self
            .connections
            .get(connection_id)
            .map(|live| live.session.clone())
            .ok_or_else(|| McpError::ConnectionNotFound(connection_id.to_string()))?;

        let tools = self.fetch_tools(&session).await?;
        if let Some(mut live) = self.connections.get_mut(connection_id) {
            live.info.tools = tools.clone();
        }
        debug!(connection_id = %connection_id, tools = tools.len(), "Refreshed tools");
        Ok(tools)
    }

    /// Route a namespaced tool call to its provider.
    pub async fn call_tool(
        &self,
        namespaced_name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult> {
        let name = NamespacedToolName::parse(namespaced_name)
            .ok_or_else(|| McpError::InvalidToolName(namespaced_name.to_string()))?;

        let session = {
            let live = self
                .connections
                .get(&name.connection_id)
                .ok_or_else(|| McpError::ConnectionNotFound(name.connection_id.clone()))?;
            if live.info.status != ConnectionStatus::Connected {
                return Err(McpError::ConnectionNotFound(name.connection_id.clone()));
            }
            if !live
                .info
                .tools
                .iter()
                .any(|tool| tool.name == name.tool_name.as_str())
            {
                return Err(McpError::ToolNotFound(namespaced_name.to_string()));
            }
            live.session.clone()
        };

        let timeout = self.config.timeouts.tool_call();
        debug!(
            connection_id = %name.connection_id,
            tool = %name.tool_name,
            "Calling tool"
        );
        match tokio::time::timeout(timeout, session.call_tool(&name.tool_name, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout(format!(
                "tool {} after {}s",
                namespaced_name,
                timeout.as_secs()
            ))),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn open_session(
        &self,
        connection_id: &str,
        session: &Arc<dyn McpSession>,
        mode: AuthMode,
    ) -> McpResult<()> {
        let timeout = self.config.timeouts.connect();
        self.retry
            .run(connection_id, || {
                let session = session.clone();
                async move {
                    match tokio::time::timeout(timeout, session.open(mode)).await {
                        Ok(result) => result,
                        Err(_) => Err(McpError::Timeout(format!(
                            "connect after {}s",
                            timeout.as_secs()
                        ))),
                    }
                }
            })
            .await
    }

    async fn fetch_tools(&self, session: &Arc<dyn McpSession>) -> McpResult<Vec<Tool>> {
        let timeout = self.config.timeouts.tool_call();
        match tokio::time::timeout(timeout, session.list_tools()).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout(format!(
                "list tools after {}s",
                timeout.as_secs()
            ))),
        }
    }

    fn register(
        &self,
        id: String,
        url: String,
        name: String,
        tools: Vec<Tool>,
        session: Arc<dyn McpSession>,
    ) -> ConnectionInfo {
        let info = ConnectionInfo {
            id: id.clone(),
            url,
            name,
            status: ConnectionStatus::Connected,
            tools,
        };
        self.connections.insert(
            id,
            LiveConnection {
                info: info.clone(),
                session,
                seq: self.sequence.fetch_add(1, Ordering::Relaxed),
            },
        );
        info
    }

    async fn close_quietly(&self, connection_id: &str, session: &Arc<dyn McpSession>) {
        if let Err(e) = session.close().await {
            warn!(connection_id = %connection_id, error = %e, "Error closing session");
        }
    }

    /// Close the session and remove every persisted trace of the id.
    async fn discard(&self, connection_id: &str, session: &Arc<dyn McpSession>) {
        self.close_quietly(connection_id, session).await;
        self.purge(connection_id).await;
    }

    async fn purge(&self, connection_id: &str) {
        if let Err(e) = self.credentials.delete_session(connection_id).await {
            warn!(connection_id = %connection_id, error = %e, "Failed to delete credentials");
        }
        if let Err(e) = self.rows.delete_connection(connection_id).await {
            warn!(connection_id = %connection_id, error = %e, "Failed to delete connection row");
        }
    }
}

fn default_name(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}
