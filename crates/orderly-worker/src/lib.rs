//! Ordered delivery queue.
//!
//! [`Queue`] pairs a [`Storage`](orderly_storage::Storage) with per-item completion
//! futures and exposes a single "process the head item" step. [`AutoQueue`] runs that
//! step from a background drain loop that sleeps until the next send.

pub mod auto_queue;
pub mod completion;
pub mod error;
pub mod handler;
pub mod queue;

pub use auto_queue::{AutoQueue, AutoQueueConfig};
pub use completion::Completion;
pub use error::QueueError;
pub use handler::{handler_fn, FnHandler, Handler};
pub use queue::{Dequeue, Queue};
