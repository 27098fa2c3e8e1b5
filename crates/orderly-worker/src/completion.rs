//! Per-item completion tracking.
//!
//! Every send registers a one-shot handle under its key. The handle is resolved exactly
//! once: `true` when the item was handled, `false` when the queue was closed first.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use orderly_storage::Key;
use tokio::sync::oneshot;

/// Future handed to a producer for one sent item.
///
/// Resolves to `true` once the item was handled successfully and acknowledged, or
/// `false` if the queue was shut down (or dropped) before that happened.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    key: Key,
    rx: oneshot::Receiver<bool>,
}

impl Completion {
    /// Key the item was stored under.
    pub fn key(&self) -> Key {
        self.key
    }
}

impl Future for Completion {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(handled)) => Poll::Ready(handled),
            // Sender dropped without resolving: the queue went away.
            Poll::Ready(Err(_)) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<Key, oneshot::Sender<bool>>,
    closed: bool,
}

/// Lock-guarded map from key to the sender half of its completion.
///
/// The lock is never held across an await point, so closing works from `Drop`.
#[derive(Default)]
pub(crate) struct CompletionRegistry {
    state: Mutex<RegistryState>,
}

impl CompletionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a completion for `key`. Returns `None` once the registry is closed.
    pub(crate) fn register(&self, key: Key) -> Option<Completion> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.pending.insert(key, tx);
        Some(Completion { key, rx })
    }

    /// Drop the registration for `key` without resolving it.
    pub(crate) fn forget(&self, key: Key) {
        self.state().pending.remove(&key);
    }

    /// Resolve `key` with `true`. Returns false if nothing was registered for it.
    pub(crate) fn complete(&self, key: Key) -> bool {
        match self.state().pending.remove(&key) {
            // The receiver may already be gone; nothing left to notify then.
            Some(tx) => {
                let _ = tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Close the registry and resolve every outstanding completion with `false`.
    /// Returns how many completions were abandoned.
    pub(crate) fn abandon_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state();
            state.closed = true;
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(false);
        }
        count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state().pending.len()
    }
}
