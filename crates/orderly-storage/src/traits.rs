//! Storage abstraction trait
//!
//! This module defines the Storage trait that all queue backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use thiserror::Error;

/// Position of an item in a storage. The first key handed out is 1.
pub type Key = u64;

/// A stored value together with the key it was assigned on enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<T> {
    pub key: Key,
    pub value: T,
}

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt journal: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Ordered storage abstraction
///
/// The consumer side (`try_get_current`, `move_next`) is meant to be driven by a single
/// caller at a time; the queue serializes it. `enqueue` and `next_key` may run
/// concurrently with the consumer side.
#[async_trait]
pub trait Storage<T: Send + 'static>: Send + Sync {
    /// Key that the next `enqueue` will assign. Never decreases.
    fn next_key(&self) -> Key;

    /// Append `value` as the new tail item and return the key it was given.
    ///
    /// Durable backends persist the record before returning.
    async fn enqueue(&self, value: T) -> StorageResult<Key>;

    /// The lowest-key item not yet advanced past, or `None` when empty.
    async fn try_get_current(&self) -> StorageResult<Option<Item<T>>>;

    /// Drop the current head item. No-op when empty.
    async fn move_next(&self) -> StorageResult<()>;

    /// Number of items not yet advanced past.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
