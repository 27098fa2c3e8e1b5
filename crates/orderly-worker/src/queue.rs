//! Queue: completion tracking on top of an ordered storage.
//!
//! `send` stores an item and hands back a [`Completion`]; `try_dequeue` runs a handler
//! against the head item and only advances the storage when the handler succeeds. A
//! failing head item therefore blocks everything behind it until it succeeds or the
//! queue is disposed.

use std::any::Any;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use orderly_storage::{Key, Storage, StorageBackend};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::completion::{Completion, CompletionRegistry};
use crate::error::QueueError;
use crate::handler::Handler;

/// Outcome of one attempt at the head item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeue {
    /// Nothing stored; the handler was not called.
    Empty,
    /// The handler accepted the item; the storage moved past it.
    Handled(Key),
    /// The handler declined, errored or panicked; the item is still the head.
    Failed(Key),
}

pub struct Queue<T: Send + 'static> {
    storage: Arc<dyn Storage<T>>,
    completions: CompletionRegistry,
    shutdown: CancellationToken,
    // Held across key reservation and enqueue so concurrent senders cannot interleave.
    send_lock: Mutex<()>,
    dequeue_lock: Mutex<()>,
}

impl<T> Queue<T>
where
    T: Debug + Send + Sync + 'static,
{
    pub fn new(storage: Arc<dyn Storage<T>>) -> Self {
        Self {
            storage,
            completions: CompletionRegistry::new(),
            shutdown: CancellationToken::new(),
            send_lock: Mutex::new(()),
            dequeue_lock: Mutex::new(()),
        }
    }

    /// Store `value` and return a future for its outcome.
    ///
    /// Does not wake any consumer; [`AutoQueue::send`](crate::AutoQueue::send) does that.
    #[tracing::instrument(skip(self, value))]
    pub async fn send(&self, value: T) -> Result<Completion, QueueError> {
        let _guard = self.send_lock.lock().await;

        let reserved = self.storage.next_key();
        let completion = self
            .completions
            .register(reserved)
            .ok_or(QueueError::Closed)?;

        match self.storage.enqueue(value).await {
            Ok(assigned) if assigned == reserved => {
                tracing::debug!(item.key = assigned, "Item stored");
                Ok(completion)
            }
            Ok(assigned) => {
                self.completions.forget(reserved);
                tracing::error!(
                    reserved = reserved,
                    assigned = assigned,
                    "Storage assigned an unexpected key"
                );
                Err(QueueError::KeyMismatch { reserved, assigned })
            }
            Err(e) => {
                self.completions.forget(reserved);
                tracing::error!(error = %e, item.key = reserved, "Failed to store item");
                Err(e.into())
            }
        }
    }

    /// Attempt the head item once. Returns `true` only when an item was handled.
    ///
    /// Handler failures are contained here; only storage errors are returned.
    pub async fn try_dequeue<H>(&self, handler: &H) -> Result<bool, QueueError>
    where
        H: Handler<T> + ?Sized,
    {
        Ok(matches!(self.process_head(handler).await?, Dequeue::Handled(_)))
    }

    /// Like [`try_dequeue`](Self::try_dequeue) but tells an empty queue apart from a
    /// failed head item.
    pub async fn process_head<H>(&self, handler: &H) -> Result<Dequeue, QueueError>
    where
        H: Handler<T> + ?Sized,
    {
        let _guard = self.dequeue_lock.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }

        let Some(item) = self.storage.try_get_current().await? else {
            return Ok(Dequeue::Empty);
        };

        let outcome = AssertUnwindSafe(handler.handle(&item.value, self.shutdown.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(true)) => {
                self.storage.move_next().await?;
                if !self.completions.complete(item.key) {
                    tracing::debug!(item.key = item.key, "No completion registered for handled item");
                }
                tracing::debug!(item.key = item.key, "Item handled");
                Ok(Dequeue::Handled(item.key))
            }
            Ok(Ok(false)) => {
                tracing::debug!(item.key = item.key, "Handler declined item; it stays at the head");
                Ok(Dequeue::Failed(item.key))
            }
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    item.key = item.key,
                    item.value = ?item.value,
                    "Error handling item"
                );
                Ok(Dequeue::Failed(item.key))
            }
            Err(panic) => {
                tracing::error!(
                    panic = %panic_message(&*panic),
                    item.key = item.key,
                    item.value = ?item.value,
                    "Handler panicked"
                );
                Ok(Dequeue::Failed(item.key))
            }
        }
    }

    /// Cancel the shutdown token and resolve every pending completion with `false`.
    ///
    /// Safe to call more than once.
    pub fn dispose(&self) {
        self.shutdown.cancel();
        let abandoned = self.completions.abandon_all();
        if abandoned > 0 {
            tracing::info!(abandoned = abandoned, "Queue disposed; pending completions abandoned");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.completions.is_closed()
    }

    /// Key the next send will be stored under.
    pub fn next_key(&self) -> Key {
        self.storage.next_key()
    }

    /// Items stored but not yet handled.
    pub async fn len(&self) -> usize {
        self.storage.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.storage.is_empty().await
    }

    /// Completions handed out and not yet resolved.
    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    /// Token passed to handlers; cancelled on dispose.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.storage.backend_type()
    }
}

impl<T: Send + 'static> Drop for Queue<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.completions.abandon_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
