//! Orderly Core Library
//!
//! This crate provides configuration and the small set of types shared by the
//! storage, worker and CLI crates.

pub mod config;
pub mod constants;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Config, LogFormat};
pub use storage_types::StorageBackend;
