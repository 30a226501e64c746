// core.rs
//
// Core types for the data connector module.
// Contains the storage traits, record types, and error type shared by every backend.
//
// Structure:
// 1. OAuth session records + trait
// 2. Connection rows + trait
// 3. Errors

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PART 1: OAuth Session Storage
// ============================================================================

/// Tokens issued by an authorization server
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Client registration returned by (dynamic) client registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthClientInformation {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<u64>,
}

/// Persisted OAuth state for one connection identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthSessionRecord {
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<OAuthTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<OAuthClientInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthSessionRecord {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            tokens: None,
            code_verifier: None,
            client_info: None,
            authorization_url: None,
            state: None,
            updated_at: Utc::now(),
        }
    }

    /// Merge `update` into this record. Fields absent from the update are kept.
    pub fn apply(&mut self, update: OAuthSessionUpdate) {
        if let Some(tokens) = update.tokens {
            self.tokens = Some(tokens);
        }
        if let Some(verifier) = update.code_verifier {
            self.code_verifier = Some(verifier);
        }
        if let Some(client_info) = update.client_info {
            self.client_info = Some(client_info);
        }
        if let Some(url) = update.authorization_url {
            self.authorization_url = Some(url);
        }
        if let Some(state) = update.state {
            self.state = Some(state);
        }
        self.updated_at = Utc::now();
    }

    /// Clear exactly one field, leaving its siblings untouched.
    pub fn clear(&mut self, field: OAuthField) {
        match field {
            OAuthField::Tokens => self.tokens = None,
            OAuthField::CodeVerifier => self.code_verifier = None,
            OAuthField::ClientInfo => self.client_info = None,
            OAuthField::AuthorizationUrl => self.authorization_url = None,
            OAuthField::State => self.state = None,
        }
        self.updated_at = Utc::now();
    }
}

/// Partial write to an OAuth session record; `None` means "leave as is"
#[derive(Debug, Clone, Default)]
pub struct OAuthSessionUpdate {
    pub tokens: Option<OAuthTokens>,
    pub code_verifier: Option<String>,
    pub client_info: Option<OAuthClientInformation>,
    pub authorization_url: Option<String>,
    pub state: Option<String>,
}

impl OAuthSessionUpdate {
    pub fn tokens(tokens: OAuthTokens) -> Self {
        Self {
            tokens: Some(tokens),
            ..Default::default()
        }
    }

    pub fn code_verifier(verifier: impl Into<String>) -> Self {
        Self {
            code_verifier: Some(verifier.into()),
            ..Default::default()
        }
    }

    pub fn client_info(info: OAuthClientInformation) -> Self {
        Self {
            client_info: Some(info),
            ..Default::default()
        }
    }

    pub fn authorization_url(url: impl Into<String>) -> Self {
        Self {
            authorization_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn state(state: impl Into<String>) -> Self {
        Self {
            state: Some(state.into()),
            ..Default::default()
        }
    }
}

/// Individually clearable fields of an OAuth session record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthField {
    Tokens,
    CodeVerifier,
    ClientInfo,
    AuthorizationUrl,
    State,
}

/// Durable OAuth credential store keyed by connection identifier
#[async_trait]
pub trait OAuthSessionStorage: Send + Sync + 'static {
    async fn get_session(&self, connection_id: &str) -> StorageResult<Option<OAuthSessionRecord>>;

    /// Create the record if missing, then merge `update` into it.
    async fn upsert_session(
        &self,
        connection_id: &str,
        update: OAuthSessionUpdate,
    ) -> StorageResult<OAuthSessionRecord>;

    /// Clear one field. A missing record is not an error.
    async fn clear_session_field(&self, connection_id: &str, field: OAuthField)
        -> StorageResult<()>;

    async fn delete_session(&self, connection_id: &str) -> StorageResult<bool>;
}

// ============================================================================
// PART 2: Connection Storage
// ============================================================================

/// Lifecycle status of a provider connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
    Error,
    PendingAuth,
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::PendingAuth => "pending_auth",
        })
    }
}

/// Persisted connection metadata row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionRecord {
    pub id: String,
    pub url: String,
    pub name: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial write to a connection row.
///
/// `url` and `name` are required only when the row does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpsert {
    pub id: String,
    pub url: Option<String>,
    pub name: Option<String>,
    pub status: Option<ConnectionStatus>,
}

impl ConnectionUpsert {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
        status: ConnectionStatus,
    ) -> Self {
        Self {
            id: id.into(),
            url: Some(url.into()),
            name: Some(name.into()),
            status: Some(status),
        }
    }
}

impl ConnectionRecord {
    /// Build a fresh row from an upsert, failing if required fields are missing.
    pub fn from_upsert(upsert: ConnectionUpsert) -> StorageResult<Self> {
        let url = upsert.url.ok_or_else(|| {
            StorageError::InvalidRecord(format!("connection '{}' has no url", upsert.id))
        })?;
        let name = upsert.name.unwrap_or_else(|| url.clone());
        let now = Utc::now();
        Ok(Self {
            id: upsert.id,
            url,
            name,
            status: upsert.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn merge(&mut self, upsert: ConnectionUpsert) {
        if let Some(url) = upsert.url {
            self.url = url;
        }
        if let Some(name) = upsert.name {
            self.name = name;
        }
        if let Some(status) = upsert.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
    }
}

/// Connection table keyed by connection identifier
#[async_trait]
pub trait ConnectionStorage: Send + Sync + 'static {
    /// All rows in creation order.
    async fn list_connections(&self) -> StorageResult<Vec<ConnectionRecord>>;

    async fn get_connection(&self, id: &str) -> StorageResult<Option<ConnectionRecord>>;

    async fn upsert_connection(&self, upsert: ConnectionUpsert) -> StorageResult<ConnectionRecord>;

    /// Returns false when no row exists for `id`.
    async fn update_connection_status(&self, id: &str, status: ConnectionStatus)
        -> StorageResult<bool>;

    async fn delete_connection(&self, id: &str) -> StorageResult<bool>;
}

// ============================================================================
// PART 3: Errors
// ============================================================================

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
