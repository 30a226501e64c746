//! In-memory storage implementation
//!
//! Used by tests and by deployments that do not need connections to survive a
//! restart. One instance implements both storage traits.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{common::StoreSnapshot, core::*};

#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<StoreSnapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OAuthSessionStorage for MemoryStorage {
    async fn get_session(&self, connection_id: &str) -> StorageResult<Option<OAuthSessionRecord>> {
        Ok(self.inner.read().get_session(connection_id))
    }

    async fn upsert_session(
        &self,
        connection_id: &str,
        update: OAuthSessionUpdate,
    ) -> StorageResult<OAuthSessionRecord> {
        Ok(self.inner.write().upsert_session(connection_id, update))
    }

    async fn clear_session_field(
        &self,
        connection_id: &str,
        field: OAuthField,
    ) -> StorageResult<()> {
        self.inner.write().clear_session_field(connection_id, field);
        Ok(())
    }

    async fn delete_session(&self, connection_id: &str) -> StorageResult<bool> {
        Ok(self.inner.write().delete_session(connection_id))
    }
}

#[async_trait]
impl ConnectionStorage for MemoryStorage {
    async fn list_connections(&self) -> StorageResult<Vec<ConnectionRecord>> {
        Ok(self.inner.read().connections.clone())
    }

    async fn get_connection(&self, id: &str) -> StorageResult<Option<ConnectionRecord>> {
        Ok(self.inner.read().get_connection(id))
    }

    async fn upsert_connection(&self, upsert: ConnectionUpsert) -> StorageResult<ConnectionRecord> {
        self.inner.write().upsert_connection(upsert)
    }

    async fn update_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
    ) -> StorageResult<bool> {
        Ok(self.inner.write().update_connection_status(id, status))
    }

    async fn delete_connection(&self, id: &str) -> StorageResult<bool> {
        Ok(self.inner.write().delete_connection(id))
    }
}
