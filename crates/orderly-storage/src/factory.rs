#[cfg(feature = "storage-file")]
use crate::{FileStorage, FileStorageOptions};
#[cfg(feature = "storage-memory")]
use crate::MemoryStorage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use orderly_core::Config;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Create a storage backend based on configuration
pub async fn create_storage<T>(config: &Config) -> StorageResult<Arc<dyn Storage<T>>>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match config.storage_backend() {
        #[cfg(feature = "storage-memory")]
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; unacknowledged items are lost on restart");
            Ok(Arc::new(MemoryStorage::<T>::new()))
        }

        #[cfg(not(feature = "storage-memory"))]
        StorageBackend::Memory => Err(StorageError::ConfigError(
            "Memory storage backend not available (storage-memory feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-file")]
        StorageBackend::File => {
            let path = config.journal_path().ok_or_else(|| {
                StorageError::ConfigError("ORDERLY_JOURNAL_PATH not configured".to_string())
            })?;

            let options = FileStorageOptions {
                sync_writes: config.sync_writes,
                compact_threshold: config.compact_threshold,
            };
            let storage = FileStorage::<T>::open(path, options).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-file"))]
        StorageBackend::File => Err(StorageError::ConfigError(
            "File storage backend not available (storage-file feature not enabled)".to_string(),
        )),
    }
}
