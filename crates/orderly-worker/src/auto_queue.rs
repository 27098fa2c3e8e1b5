//! AutoQueue: a [`Queue`] drained by a background task.
//!
//! The drain loop processes head items until the queue is empty or the head item fails,
//! then sleeps on a counting wake signal. Every successful send adds one wake permit.
//!
//! A failed head item is only retried on the next wake. With the default configuration
//! a queue whose head keeps failing and that receives no further sends stalls until
//! [`AutoQueue::wake`] is called; set [`AutoQueueConfig::retry_interval`] to retry on a
//! timer instead.

use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use orderly_core::Config;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::completion::Completion;
use crate::error::QueueError;
use crate::handler::Handler;
use crate::queue::{Dequeue, Queue};

#[derive(Clone, Debug, Default)]
pub struct AutoQueueConfig {
    /// Wake up after this long when the last drain stopped on a failed head item.
    /// `None` waits for the next send or [`AutoQueue::wake`].
    pub retry_interval: Option<Duration>,
}

impl From<&Config> for AutoQueueConfig {
    fn from(config: &Config) -> Self {
        Self {
            retry_interval: config.retry_interval(),
        }
    }
}

pub struct AutoQueue<T: Send + 'static> {
    queue: Arc<Queue<T>>,
    wake: Arc<Semaphore>,
    shutdown: CancellationToken,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> AutoQueue<T>
where
    T: Debug + Send + Sync + 'static,
{
    /// Start draining `queue` through `handler` on the current tokio runtime.
    pub fn new<H>(queue: Queue<T>, handler: H) -> Self
    where
        H: Handler<T> + 'static,
    {
        Self::with_config(queue, handler, AutoQueueConfig::default())
    }

    pub fn with_config<H>(queue: Queue<T>, handler: H, config: AutoQueueConfig) -> Self
    where
        H: Handler<T> + 'static,
    {
        let queue = Arc::new(queue);
        let wake = Arc::new(Semaphore::new(0));
        let shutdown = queue.shutdown_token();

        let drain_task = tokio::spawn(drain_loop(
            queue.clone(),
            handler,
            wake.clone(),
            shutdown.clone(),
            config,
        ));

        Self {
            queue,
            wake,
            shutdown,
            drain_task: Mutex::new(Some(drain_task)),
        }
    }

    /// Store `value` and wake the drain loop.
    pub async fn send(&self, value: T) -> Result<Completion, QueueError> {
        let completion = self.queue.send(value).await?;
        self.wake.add_permits(1);
        Ok(completion)
    }

    /// Wake the drain loop without sending, e.g. to retry a stalled head item.
    pub fn wake(&self) {
        self.wake.add_permits(1);
    }

    pub fn queue(&self) -> &Queue<T> {
        &self.queue
    }

    /// Stop the drain loop, wait for it to exit, then dispose the inner queue.
    ///
    /// An in-flight handler call is awaited, not aborted; it sees its token cancelled.
    /// Concurrent callers all return only after the drain loop has exited.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        // Held across the join so a concurrent caller cannot return early.
        let mut drain_task = self.drain_task.lock().await;
        if let Some(handle) = drain_task.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Drain loop task failed");
            }
        }
        drop(drain_task);

        self.queue.dispose();
    }
}

impl<T: Send + 'static> Drop for AutoQueue<T> {
    fn drop(&mut self) {
        // The drain loop disposes the queue once it observes the token.
        self.shutdown.cancel();
    }
}

async fn drain_loop<T, H>(
    queue: Arc<Queue<T>>,
    handler: H,
    wake: Arc<Semaphore>,
    shutdown: CancellationToken,
    config: AutoQueueConfig,
) where
    T: Debug + Send + Sync + 'static,
    H: Handler<T>,
{
    tracing::info!(
        retry_interval_ms = config.retry_interval.map(|d| d.as_millis() as u64),
        storage_backend = %queue.storage_backend(),
        "Drain loop started"
    );

    while !shutdown.is_cancelled() {
        let stalled = match AssertUnwindSafe(drain(&queue, &handler, &shutdown))
            .catch_unwind()
            .await
        {
            Ok(Ok(stalled)) => stalled,
            Ok(Err(QueueError::Closed)) => break,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Error in drain loop");
                true
            }
            Err(_) => {
                tracing::error!("Drain loop iteration panicked");
                true
            }
        };

        let retry_after = if stalled { config.retry_interval } else { None };
        if !wait_for_wake(&wake, &shutdown, retry_after).await {
            break;
        }
    }

    queue.dispose();
    tracing::info!("Drain loop stopped");
}

/// Process head items back to back. Returns `true` when draining stopped on a failed
/// head item rather than an empty queue.
async fn drain<T, H>(
    queue: &Queue<T>,
    handler: &H,
    shutdown: &CancellationToken,
) -> Result<bool, QueueError>
where
    T: Debug + Send + Sync + 'static,
    H: Handler<T>,
{
    while !shutdown.is_cancelled() {
        match queue.process_head(handler).await? {
            Dequeue::Handled(_) => continue,
            Dequeue::Empty => return Ok(false),
            Dequeue::Failed(key) => {
                tracing::debug!(item.key = key, "Head item failed; drain loop going idle");
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Block until a wake permit is available, the retry interval (if any) elapses, or
/// shutdown is requested. Returns `false` on shutdown.
async fn wait_for_wake(
    wake: &Semaphore,
    shutdown: &CancellationToken,
    retry_after: Option<Duration>,
) -> bool {
    let retry = async {
        match retry_after {
            Some(interval) => tokio::time::sleep(interval).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        permit = wake.acquire() => match permit {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        },
        _ = retry => true,
    }
}
