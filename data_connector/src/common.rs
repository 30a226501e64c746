use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{
    ConnectionRecord, ConnectionStatus, ConnectionUpsert, OAuthField, OAuthSessionRecord,
    OAuthSessionUpdate, StorageResult,
};

/// Complete contents of a store.
///
/// Shared by the memory and file backends: the memory backend keeps one behind a
/// lock, the file backend additionally serializes it to disk after every write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct StoreSnapshot {
    #[serde(default)]
    pub sessions: BTreeMap<String, OAuthSessionRecord>,
    /// Kept in creation order
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

impl StoreSnapshot {
    pub fn get_session(&self, connection_id: &str) -> Option<OAuthSessionRecord> {
        self.sessions.get(connection_id).cloned()
    }

    pub fn upsert_session(
        &mut self,
        connection_id: &str,
        update: OAuthSessionUpdate,
    ) -> OAuthSessionRecord {
        let record = self
            .sessions
            .entry(connection_id.to_string())
            .or_insert_with(|| OAuthSessionRecord::new(connection_id));
        record.apply(update);
        record.clone()
    }

    /// Returns true when a record existed.
    pub fn clear_session_field(&mut self, connection_id: &str, field: OAuthField) -> bool {
        match self.sessions.get_mut(connection_id) {
            Some(record) => {
                record.clear(field);
                true
            }
            None => false,
        }
    }

    pub fn delete_session(&mut self, connection_id: &str) -> bool {
        self.sessions.remove(connection_id).is_some()
    }

    pub fn get_connection(&self, id: &str) -> Option<ConnectionRecord> {
        self.connections.iter().find(|row| row.id == id).cloned()
    }

    pub fn upsert_connection(&mut self, upsert: ConnectionUpsert) -> StorageResult<ConnectionRecord> {
        if let Some(row) = self.connections.iter_mut().find(|row| row.id == upsert.id) {
            row.merge(upsert);
            return Ok(row.clone());
        }
        let row = ConnectionRecord::from_upsert(upsert)?;
        self.connections.push(row.clone());
        Ok(row)
    }

    pub fn update_connection_status(&mut self, id: &str, status: ConnectionStatus) -> bool {
        match self.connections.iter_mut().find(|row| row.id == id) {
            Some(row) => {
                row.merge(ConnectionUpsert {
                    id: id.to_string(),
                    status: Some(status),
                    ..Default::default()
                });
                true
            }
            None => false,
        }
    }

    pub fn delete_connection(&mut self, id: &str) -> bool {
        let before = self.connections.len();
        self.connections.retain(|row| row.id != id);
        self.connections.len() != before
    }
}
