//! Storage backend configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Location of the JSON document for the `file` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::File,
            path: Some(path.into()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            StorageBackend::Memory => Ok(()),
            StorageBackend::File => match &self.path {
                Some(path) if !path.as_os_str().is_empty() => Ok(()),
                _ => Err("file storage backend requires a path".to_string()),
            },
        }
    }
}
