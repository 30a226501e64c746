//! JSON file storage implementation
//!
//! The whole store is a single JSON document. Every write rewrites it through a
//! temporary sibling file followed by a rename, so a crash mid-write leaves the
//! previous version intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{common::StoreSnapshot, core::*};

pub struct FileStorage {
    path: PathBuf,
    inner: Mutex<StoreSnapshot>,
}

impl FileStorage {
    /// Open the store at `path`, creating an empty one if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => StoreSnapshot::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Creating new connection store");
                StoreSnapshot::default()
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            path = %path.display(),
            connections = snapshot.connections.len(),
            sessions = snapshot.sessions.len(),
            "Loaded connection store"
        );

        Ok(Self {
            path,
            inner: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, snapshot: &StoreSnapshot) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl OAuthSessionStorage for FileStorage {
    async fn get_session(&self, connection_id: &str) -> StorageResult<Option<OAuthSessionRecord>> {
        Ok(self.inner.lock().await.get_session(connection_id))
    }

    async fn upsert_session(
        &self,
        connection_id: &str,
        update: OAuthSessionUpdate,
    ) -> StorageResult<OAuthSessionRecord> {
        let mut snapshot = self.inner.lock().await;
        let record = snapshot.upsert_session(connection_id, update);
        self.persist(&snapshot).await?;
        Ok(record)
    }

    async fn clear_session_field(
        &self,
        connection_id: &str,
        field: OAuthField,
    ) -> StorageResult<()> {
        let mut snapshot = self.inner.lock().await;
        if snapshot.clear_session_field(connection_id, field) {
            self.persist(&snapshot).await?;
        }
        Ok(())
    }

    async fn delete_session(&self, connection_id: &str) -> StorageResult<bool> {
        let mut snapshot = self.inner.lock().await;
        let removed = snapshot.delete_session(connection_id);
        if removed {
            self.persist(&snapshot).await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl ConnectionStorage for FileStorage {
    async fn list_connections(&self) -> StorageResult<Vec<ConnectionRecord>> {
        Ok(self.inner.lock().await.connections.clone())
    }

    async fn get_connection(&self, id: &str) -> StorageResult<Option<ConnectionRecord>> {
        Ok(self.inner.lock().await.get_connection(id))
    }

    async fn upsert_connection(&self, upsert: ConnectionUpsert) -> StorageResult<ConnectionRecord> {
        let mut snapshot = self.inner.lock().await;
        let row = snapshot.upsert_connection(upsert)?;
        self.persist(&snapshot).await?;
        Ok(row)
    }

    async fn update_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
    ) -> StorageResult<bool> {
        let mut snapshot = self.inner.lock().await;
        let updated = snapshot.update_connection_status(id, status);
        if updated {
            self.persist(&snapshot).await?;
        }
        Ok(updated)
    }

    async fn delete_connection(&self, id: &str) -> StorageResult<bool> {
        let mut snapshot = self.inner.lock().await;
        let removed = snapshot.delete_connection(id);
        if removed {
            self.persist(&snapshot).await?;
        }
        Ok(removed)
    }
}
