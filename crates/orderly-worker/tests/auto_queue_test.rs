use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use orderly_storage::{FileStorage, FileStorageOptions, MemoryStorage, Storage};
use orderly_worker::{AutoQueue, AutoQueueConfig, Completion, Handler, Queue, QueueError};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

type Policy = dyn Fn(&str, usize) -> bool + Send + Sync;

/// Records every attempt and decides the outcome from the value and how many times it
/// has been attempted before.
struct ScriptedHandler {
    attempts: Arc<Mutex<Vec<(String, bool)>>>,
    policy: Box<Policy>,
}

impl ScriptedHandler {
    fn new(policy: impl Fn(&str, usize) -> bool + Send + Sync + 'static) -> (Self, Arc<Mutex<Vec<(String, bool)>>>) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let handler = Self {
            attempts: attempts.clone(),
            policy: Box::new(policy),
        };
        (handler, attempts)
    }

    fn always_succeed() -> (Self, Arc<Mutex<Vec<(String, bool)>>>) {
        Self::new(|_, _| true)
    }
}

#[async_trait]
impl Handler<String> for ScriptedHandler {
    async fn handle(&self, item: &String, _cancel: CancellationToken) -> Result<bool> {
        let mut attempts = self.attempts.lock().unwrap();
        let previous = attempts.iter().filter(|(value, _)| value == item).count();
        let ok = (self.policy)(item, previous);
        attempts.push((item.clone(), ok));
        Ok(ok)
    }
}

fn memory_queue() -> Queue<String> {
    Queue::new(Arc::new(MemoryStorage::new()))
}

fn successes(attempts: &Mutex<Vec<(String, bool)>>) -> Vec<String> {
    attempts
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, ok)| *ok)
        .map(|(value, _)| value.clone())
        .collect()
}

async fn resolved(completion: Completion) -> bool {
    tokio::time::timeout(WAIT, completion)
        .await
        .expect("completion did not resolve in time")
}

#[tokio::test]
async fn test_sends_are_handled_in_key_order() {
    let (handler, attempts) = ScriptedHandler::always_succeed();
    let auto = AutoQueue::new(memory_queue(), handler);

    let mut completions = Vec::new();
    for i in 0..20 {
        completions.push(auto.send(format!("item-{i}")).await.unwrap());
    }

    let keys: Vec<_> = completions.iter().map(Completion::key).collect();
    assert_eq!(keys, (1..=20).collect::<Vec<u64>>());

    for completion in completions {
        assert!(resolved(completion).await);
    }

    let expected: Vec<_> = (0..20).map(|i| format!("item-{i}")).collect();
    assert_eq!(successes(&attempts), expected);

    auto.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_senders_get_distinct_keys() {
    let (handler, attempts) = ScriptedHandler::always_succeed();
    let auto = Arc::new(AutoQueue::new(memory_queue(), handler));

    let mut tasks = Vec::new();
    for i in 0..50 {
        let auto = auto.clone();
        tasks.push(tokio::spawn(async move {
            let value = format!("v{i}");
            let completion = auto.send(value.clone()).await.unwrap();
            let key = completion.key();
            let handled = tokio::time::timeout(WAIT, completion).await.unwrap();
            (key, value, handled)
        }));
    }

    let mut by_key = HashMap::new();
    for task in tasks {
        let (key, value, handled) = task.await.unwrap();
        assert!(handled);
        assert!(by_key.insert(key, value).is_none(), "key {key} assigned twice");
    }

    let keys: HashSet<u64> = by_key.keys().copied().collect();
    assert_eq!(keys, (1..=50).collect::<HashSet<u64>>());

    let mut ordered_keys: Vec<_> = by_key.keys().copied().collect();
    ordered_keys.sort_unstable();
    let expected: Vec<_> = ordered_keys.iter().map(|key| by_key[key].clone()).collect();
    assert_eq!(successes(&attempts), expected);

    auto.shutdown().await;
}

#[tokio::test]
async fn test_failed_head_blocks_later_items_until_retried() {
    // B fails on its first attempt only
    let (handler, attempts) = ScriptedHandler::new(|value, previous| value != "B" || previous > 0);
    let auto = AutoQueue::new(memory_queue(), handler);

    let a = auto.send("A".to_string()).await.unwrap();
    let b = auto.send("B".to_string()).await.unwrap();
    let c = auto.send("C".to_string()).await.unwrap();

    assert!(resolved(a).await);
    assert!(resolved(b).await);
    assert!(resolved(c).await);

    let log = attempts.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            ("A".to_string(), true),
            ("B".to_string(), false),
            ("B".to_string(), true),
            ("C".to_string(), true),
        ]
    );

    auto.shutdown().await;
}

#[tokio::test]
async fn test_failing_head_stalls_until_next_wake() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let (handler, attempts) = ScriptedHandler::new(move |_, _| flag.load(Ordering::SeqCst));
    let auto = AutoQueue::new(memory_queue(), handler);

    let mut x = auto.send("X".to_string()).await.unwrap();
    let mut y = auto.send("Y".to_string()).await.unwrap();

    // Nothing wakes the loop again, so neither item makes progress.
    assert!(tokio::time::timeout(Duration::from_millis(200), &mut x).await.is_err());
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut y).await.is_err());
    {
        let log = attempts.lock().unwrap();
        assert!(!log.is_empty());
        assert!(log.iter().all(|(value, ok)| value == "X" && !ok));
    }

    healthy.store(true, Ordering::SeqCst);
    auto.wake();

    assert!(resolved(x).await);
    assert!(resolved(y).await);
    assert_eq!(successes(&attempts), vec!["X".to_string(), "Y".to_string()]);

    auto.shutdown().await;
}

#[tokio::test]
async fn test_new_send_retries_stalled_head() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let (handler, attempts) = ScriptedHandler::new(move |_, _| flag.load(Ordering::SeqCst));
    let auto = AutoQueue::new(memory_queue(), handler);

    let mut x = auto.send("X".to_string()).await.unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(100), &mut x).await.is_err());

    healthy.store(true, Ordering::SeqCst);
    let y = auto.send("Y".to_string()).await.unwrap();

    assert!(resolved(x).await);
    assert!(resolved(y).await);
    assert_eq!(successes(&attempts), vec!["X".to_string(), "Y".to_string()]);

    auto.shutdown().await;
}

#[tokio::test]
async fn test_retry_interval_recovers_without_new_sends() {
    // First attempt fails, every later one succeeds
    let (handler, attempts) = ScriptedHandler::new(|_, previous| previous > 0);
    let config = AutoQueueConfig {
        retry_interval: Some(Duration::from_millis(20)),
    };
    let auto = AutoQueue::with_config(memory_queue(), handler, config);

    let x = auto.send("X".to_string()).await.unwrap();
    assert!(resolved(x).await);

    let log = attempts.lock().unwrap().clone();
    assert_eq!(log.first(), Some(&("X".to_string(), false)));
    assert_eq!(log.last(), Some(&("X".to_string(), true)));

    auto.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_abandons_pending_items() {
    let (handler, _attempts) = ScriptedHandler::new(|_, _| false);
    let auto = AutoQueue::new(memory_queue(), handler);

    let x = auto.send("X".to_string()).await.unwrap();
    let y = auto.send("Y".to_string()).await.unwrap();

    auto.shutdown().await;
    auto.shutdown().await;

    assert!(!resolved(x).await);
    assert!(!resolved(y).await);
    assert!(auto.queue().is_closed());
    assert!(matches!(
        auto.send("Z".to_string()).await,
        Err(QueueError::Closed)
    ));
}

#[tokio::test]
async fn test_dispose_before_handler_runs() {
    let queue = memory_queue();
    let x = queue.send("X".to_string()).await.unwrap();
    queue.dispose();
    assert!(!resolved(x).await);
}

/// Waits for shutdown, then declines the item.
struct WaitForShutdown;

#[async_trait]
impl Handler<String> for WaitForShutdown {
    async fn handle(&self, _item: &String, cancel: CancellationToken) -> Result<bool> {
        cancel.cancelled().await;
        Ok(false)
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_handler() {
    let auto = AutoQueue::new(memory_queue(), WaitForShutdown);
    let x = auto.send("X".to_string()).await.unwrap();

    // Give the loop a chance to enter the handler
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(WAIT, auto.shutdown())
        .await
        .expect("shutdown did not finish");
    assert!(!resolved(x).await);
    assert_eq!(auto.queue().len().await, 1);
}

/// Takes a while to wind down after shutdown is requested.
struct SlowToStop {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Handler<String> for SlowToStop {
    async fn handle(&self, _item: &String, cancel: CancellationToken) -> Result<bool> {
        cancel.cancelled().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.stopped.store(true, Ordering::SeqCst);
        Ok(false)
    }
}

#[tokio::test]
async fn test_concurrent_shutdowns_both_wait_for_drain_loop() {
    let stopped = Arc::new(AtomicBool::new(false));
    let auto = AutoQueue::new(
        memory_queue(),
        SlowToStop {
            stopped: stopped.clone(),
        },
    );
    let x = auto.send("X".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = async {
        auto.shutdown().await;
        stopped.load(Ordering::SeqCst)
    };
    let second = async {
        auto.shutdown().await;
        stopped.load(Ordering::SeqCst)
    };
    let (first, second) = tokio::time::timeout(WAIT, async { tokio::join!(first, second) })
        .await
        .expect("shutdown did not finish");

    assert!(first);
    assert!(second);
    assert!(!resolved(x).await);
}

#[tokio::test]
async fn test_dropping_auto_queue_abandons_pending_items() {
    let (handler, _attempts) = ScriptedHandler::new(|_, _| false);
    let auto = AutoQueue::new(memory_queue(), handler);
    let x = auto.send("X".to_string()).await.unwrap();

    drop(auto);
    assert!(!resolved(x).await);
}

#[tokio::test]
async fn test_journal_items_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let options = FileStorageOptions {
        sync_writes: true,
        compact_threshold: 4,
    };

    {
        let storage: Arc<dyn Storage<String>> = Arc::new(
            FileStorage::open(dir.path(), options.clone()).await.unwrap(),
        );
        let (handler, _attempts) = ScriptedHandler::new(|value, _| value == "first");
        let auto = AutoQueue::new(Queue::new(storage), handler);

        let first = auto.send("first".to_string()).await.unwrap();
        let second = auto.send("second".to_string()).await.unwrap();
        assert!(resolved(first).await);

        auto.shutdown().await;
        assert!(!resolved(second).await);
    }

    let storage: Arc<dyn Storage<String>> =
        Arc::new(FileStorage::open(dir.path(), options).await.unwrap());
    assert_eq!(storage.len().await, 1);
    assert_eq!(storage.next_key(), 3);

    let (handler, attempts) = ScriptedHandler::always_succeed();
    let auto = AutoQueue::new(Queue::new(storage), handler);
    let third = auto.send("third".to_string()).await.unwrap();
    assert_eq!(third.key(), 3);
    assert!(resolved(third).await);

    assert_eq!(
        successes(&attempts),
        vec!["second".to_string(), "third".to_string()]
    );
    assert!(auto.queue().is_empty().await);

    auto.shutdown().await;
}
