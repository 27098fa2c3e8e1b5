use crate::traits::{Item, Key, Storage, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use orderly_core::constants::FIRST_KEY;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-memory storage backed by a FIFO of `(key, value)` pairs.
///
/// Not persistent: on restart every unacknowledged item and its key is lost.
pub struct MemoryStorage<T> {
    items: Mutex<VecDeque<Item<T>>>,
    next_key: AtomicU64,
}

impl<T> MemoryStorage<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            next_key: AtomicU64::new(FIRST_KEY),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Item<T>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Storage<T> for MemoryStorage<T>
where
    T: Clone + Send + 'static,
{
    fn next_key(&self) -> Key {
        self.next_key.load(Ordering::Acquire)
    }

    async fn enqueue(&self, value: T) -> StorageResult<Key> {
        let mut items = self.items();
        let key = self.next_key.load(Ordering::Acquire);
        items.push_back(Item { key, value });
        self.next_key.store(key + 1, Ordering::Release);
        Ok(key)
    }

    async fn try_get_current(&self) -> StorageResult<Option<Item<T>>> {
        Ok(self.items().front().cloned())
    }

    async fn move_next(&self) -> StorageResult<()> {
        self.items().pop_front();
        Ok(())
    }

    async fn len(&self) -> usize {
        self.items().len()
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
