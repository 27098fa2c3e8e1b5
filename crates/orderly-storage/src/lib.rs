//! Orderly Storage Library
//!
//! This crate provides the ordered storage abstraction the queue is built on, plus
//! an in-memory backend and a durable file journal backend.
//!
//! # Key assignment
//!
//! Every storage hands out keys starting at 1, one per successful enqueue, strictly
//! increasing and never reused. The lowest key not yet advanced past is the head item.
//! Peeking never removes; `move_next` is the only way an item leaves the storage.

pub mod factory;
#[cfg(feature = "storage-file")]
pub mod file;
#[cfg(feature = "storage-memory")]
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-file")]
pub use file::{FileStorage, FileStorageOptions};
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
pub use orderly_core::StorageBackend;
pub use traits::{Item, Key, Storage, StorageError, StorageResult};
