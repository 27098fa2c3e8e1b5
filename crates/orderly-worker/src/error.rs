use orderly_storage::{Key, StorageError};
use thiserror::Error;

/// Errors returned by [`Queue`](crate::Queue) and [`AutoQueue`](crate::AutoQueue).
///
/// Handler failures never show up here; they keep the item at the head and are logged.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Storage assigned key {assigned} but key {reserved} was reserved")]
    KeyMismatch { reserved: Key, assigned: Key },
}
