//! Item handler trait
//!
//! The queue calls `handle` with the current head value. Returning `Ok(true)` marks the
//! item as delivered; `Ok(false)` or an error leaves it at the head for the next attempt.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Handler for items taken from the head of a queue.
///
/// `cancel` fires when the queue shuts down. Long-running handlers should watch it and
/// return promptly; the queue never aborts an in-flight call.
#[async_trait]
pub trait Handler<T: Sync>: Send + Sync {
    async fn handle(&self, item: &T, cancel: CancellationToken) -> Result<bool>;
}

#[async_trait]
impl<T, H> Handler<T> for Arc<H>
where
    T: Sync,
    H: Handler<T> + ?Sized,
{
    async fn handle(&self, item: &T, cancel: CancellationToken) -> Result<bool> {
        (**self).handle(item, cancel).await
    }
}

/// Handler built from a closure. See [`handler_fn`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a closure taking an owned item into a [`Handler`].
///
/// The item is cloned out of the queue for every attempt.
pub fn handler_fn<T, F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(T, CancellationToken) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    FnHandler { f }
}

#[async_trait]
impl<T, F, Fut> Handler<T> for FnHandler<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    async fn handle(&self, item: &T, cancel: CancellationToken) -> Result<bool> {
        (self.f)(item.clone(), cancel).await
    }
}
