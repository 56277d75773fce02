#[cfg(feature = "storage-local")]
use crate::LocalStorage;
use crate::{MemoryStorage, Storage, StorageResult};
#[cfg(not(feature = "storage-local"))]
use crate::StorageError;
use std::sync::Arc;
use transfer_core::{Config, StorageBackend};

/// Create a storage backend based on configuration
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    match config.storage_backend() {
        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let storage =
                LocalStorage::new(config.temp_storage_path(), config.permanent_storage_path())
                    .await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
    }
}
