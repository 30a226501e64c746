//! Storage factory for creating storage backends from configuration.

use std::sync::Arc;

use tracing::info;

use super::{
    config::{StorageBackend, StorageConfig},
    core::{ConnectionStorage, OAuthSessionStorage, StorageError, StorageResult},
    file::FileStorage,
    memory::MemoryStorage,
};

/// Type alias for the storage tuple returned by factory functions.
pub type StorageTuple = (Arc<dyn OAuthSessionStorage>, Arc<dyn ConnectionStorage>);

/// Create both storages for the configured backend.
///
/// The two trait objects share one underlying backend instance.
pub async fn create_storage(config: &StorageConfig) -> StorageResult<StorageTuple> {
    config.validate().map_err(StorageError::InvalidRecord)?;

    match config.backend {
        StorageBackend::Memory => {
            info!("Initializing data connector: Memory");
            let storage = Arc::new(MemoryStorage::new());
            Ok((storage.clone(), storage))
        }
        StorageBackend::File => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| StorageError::InvalidRecord("missing file path".to_string()))?;
            info!(path = %path.display(), "Initializing data connector: File");
            let storage = Arc::new(FileStorage::open(path).await?);
            Ok((storage.clone(), storage))
        }
    }
}
