//! Data connector module for MCP connection persistence.
//!
//! Provides storage backends for:
//! - OAuth session records (tokens, PKCE verifier, client registration,
//!   pending authorization URL, state nonce)
//! - Connection rows (id, url, name, status)
//!
//! Supported backends:
//! - Memory (default)
//! - File (single JSON document)

mod common;
pub mod config;
mod core;
mod factory;
mod file;
mod memory;

// Re-export core types and traits
pub use self::core::{
    ConnectionRecord, ConnectionStatus, ConnectionStorage, ConnectionUpsert,
    OAuthClientInformation, OAuthField, OAuthSessionRecord, OAuthSessionStorage,
    OAuthSessionUpdate, OAuthTokens, StorageError, StorageResult,
};

pub use config::{StorageBackend, StorageConfig};
// Re-export factory
pub use factory::{create_storage, StorageTuple};
pub use file::FileStorage;
// Re-export memory implementation for testing
pub use memory::MemoryStorage;
