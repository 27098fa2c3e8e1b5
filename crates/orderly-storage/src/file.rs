//! Durable journal storage.
//!
//! Layout of a journal directory:
//!
//! - `journal.jsonl`: one `{"key": .., "value": ..}` record per line, append only.
//! - `head`: highest acknowledged key as decimal text (missing means nothing acknowledged).
//!
//! Records at or below the head are skipped on open. Once enough records have been
//! acknowledged the journal is rewritten with only the pending records.

use crate::traits::{Item, Key, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use orderly_core::constants::{DEFAULT_COMPACT_THRESHOLD, HEAD_FILE_NAME, JOURNAL_FILE_NAME};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Tuning knobs for [`FileStorage`].
#[derive(Clone, Debug)]
pub struct FileStorageOptions {
    /// Sync file contents to disk before `enqueue` / `move_next` return.
    pub sync_writes: bool,
    /// Acknowledgements between journal rewrites. Must be greater than zero.
    pub compact_threshold: usize,
}

impl Default for FileStorageOptions {
    fn default() -> Self {
        Self {
            sync_writes: true,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Record<V> {
    key: Key,
    value: V,
}

struct JournalState {
    journal: File,
    /// Length of the journal up to the last complete record.
    journal_len: u64,
    pending: VecDeque<(Key, serde_json::Value)>,
    acked_since_compaction: usize,
    /// Set when a partial record could not be rolled back. Appends are refused until
    /// the journal is reopened, which truncates the torn tail.
    torn_tail: bool,
}

/// File-backed storage that survives process restarts.
///
/// Only one process may open a journal directory at a time.
pub struct FileStorage<T> {
    dir: PathBuf,
    options: FileStorageOptions,
    next_key: AtomicU64,
    state: Mutex<JournalState>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> FileStorage<T> {
    /// Open (or create) the journal in `dir` and recover pending records.
    pub async fn open(dir: impl Into<PathBuf>, options: FileStorageOptions) -> StorageResult<Self> {
        let dir = dir.into();
        if options.compact_threshold == 0 {
            return Err(StorageError::ConfigError(
                "compact_threshold must be greater than zero".to_string(),
            ));
        }

        fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create journal directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let head = read_head(&dir.join(HEAD_FILE_NAME)).await?;
        let journal_path = dir.join(JOURNAL_FILE_NAME);
        let recovered = recover_journal(&journal_path).await?;

        let mut journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .await?;

        if recovered.valid_len < recovered.file_len {
            tracing::warn!(
                path = %journal_path.display(),
                discarded_bytes = recovered.file_len - recovered.valid_len,
                "Discarding torn record at end of journal"
            );
            journal.set_len(recovered.valid_len).await?;
        }

        let mut journal_len = recovered.valid_len;
        if recovered.missing_newline {
            journal.write_all(b"\n").await?;
            journal.flush().await?;
            journal_len += 1;
        }

        let highest = recovered.last_key.unwrap_or(0).max(head);
        let pending: VecDeque<_> = recovered
            .records
            .into_iter()
            .filter(|(key, _)| *key > head)
            .collect();

        tracing::info!(
            path = %dir.display(),
            head = head,
            pending = pending.len(),
            next_key = highest + 1,
            "Journal storage opened"
        );

        Ok(Self {
            dir,
            options,
            next_key: AtomicU64::new(highest + 1),
            state: Mutex::new(JournalState {
                journal,
                journal_len,
                pending,
                acked_since_compaction: 0,
                torn_tail: false,
            }),
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    async fn write_head(&self, key: Key) -> StorageResult<()> {
        let tmp = self.dir.join(format!("{}.tmp", HEAD_FILE_NAME));
        let mut file = File::create(&tmp).await?;
        file.write_all(key.to_string().as_bytes()).await?;
        file.flush().await?;
        if self.options.sync_writes {
            file.sync_all().await?;
        }
        drop(file);
        fs::rename(&tmp, self.dir.join(HEAD_FILE_NAME)).await?;
        Ok(())
    }

    async fn compact(&self, state: &mut JournalState) -> StorageResult<()> {
        let journal_path = self.dir.join(JOURNAL_FILE_NAME);
        let tmp = self.dir.join(format!("{}.tmp", JOURNAL_FILE_NAME));

        let mut contents = String::new();
        for (key, value) in &state.pending {
            contents.push_str(&serde_json::to_string(&Record { key: *key, value })?);
            contents.push('\n');
        }

        match fs::remove_file(&tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }

        // The append handle is opened before the rename so nothing can fail after it.
        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&tmp)
            .await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp, &journal_path).await?;

        state.journal = file;
        state.journal_len = contents.len() as u64;

        tracing::debug!(
            path = %journal_path.display(),
            acknowledged = state.acked_since_compaction,
            pending = state.pending.len(),
            "Journal compacted"
        );
        state.acked_since_compaction = 0;
        Ok(())
    }
}

#[async_trait]
impl<T> Storage<T> for FileStorage<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn next_key(&self) -> Key {
        self.next_key.load(Ordering::Acquire)
    }

    async fn enqueue(&self, value: T) -> StorageResult<Key> {
        let value = serde_json::to_value(&value)?;
        let mut state = self.state.lock().await;
        if state.torn_tail {
            return Err(StorageError::Corrupt(format!(
                "journal in {} ends in a partial record; reopen it to recover",
                self.dir.display()
            )));
        }
        let key = self.next_key.load(Ordering::Acquire);

        let mut line = serde_json::to_string(&Record { key, value: &value })?;
        line.push('\n');

        let written = async {
            state.journal.write_all(line.as_bytes()).await?;
            state.journal.flush().await?;
            if self.options.sync_writes {
                state.journal.sync_data().await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = written {
            // Drop whatever part of the record made it to disk so later appends stay aligned.
            let len = state.journal_len;
            if let Err(truncate_err) = state.journal.set_len(len).await {
                tracing::error!(
                    error = %truncate_err,
                    key = key,
                    "Failed to roll back partial journal write; refusing further appends"
                );
                state.torn_tail = true;
            }
            return Err(StorageError::Io(e));
        }

        state.journal_len += line.len() as u64;
        state.pending.push_back((key, value));
        self.next_key.store(key + 1, Ordering::Release);
        Ok(key)
    }

    async fn try_get_current(&self) -> StorageResult<Option<Item<T>>> {
        let state = self.state.lock().await;
        match state.pending.front() {
            Some((key, value)) => Ok(Some(Item {
                key: *key,
                value: serde_json::from_value(value.clone())?,
            })),
            None => Ok(None),
        }
    }

    async fn move_next(&self) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let Some(&(key, _)) = state.pending.front() else {
            return Ok(());
        };

        self.write_head(key).await?;
        state.pending.pop_front();
        state.acked_since_compaction += 1;

        if state.acked_since_compaction >= self.options.compact_threshold {
            // The head pointer is already durable; a failed rewrite is retried on the next ack.
            if let Err(e) = self.compact(&mut state).await {
                tracing::warn!(error = %e, path = %self.dir.display(), "Journal compaction failed");
            }
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::File
    }
}

async fn read_head(path: &Path) -> StorageResult<Key> {
    match fs::read_to_string(path).await {
        Ok(raw) => raw
            .trim()
            .parse::<Key>()
            .map_err(|e| StorageError::Corrupt(format!("invalid head pointer '{}': {}", raw.trim(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(StorageError::Io(e)),
    }
}

struct RecoveredJournal {
    records: Vec<(Key, serde_json::Value)>,
    last_key: Option<Key>,
    file_len: u64,
    valid_len: u64,
    missing_newline: bool,
}

async fn recover_journal(path: &Path) -> StorageResult<RecoveredJournal> {
    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(StorageError::Io(e)),
    };
    parse_journal(&contents)
}

fn parse_journal(contents: &[u8]) -> StorageResult<RecoveredJournal> {
    let mut records = Vec::new();
    let mut last_key: Option<Key> = None;
    let mut valid_len = 0usize;
    let mut missing_newline = false;

    let lines: Vec<&[u8]> = contents.split_inclusive(|b| *b == b'\n').collect();
    for (index, raw) in lines.iter().enumerate() {
        let is_last = index + 1 == lines.len();
        let terminated = raw.ends_with(b"\n");
        let line = raw.trim_ascii_end();

        if line.is_empty() {
            valid_len += raw.len();
            continue;
        }

        let record: Record<serde_json::Value> = match serde_json::from_slice(line) {
            Ok(record) => record,
            Err(_) if is_last => break,
            Err(e) => {
                return Err(StorageError::Corrupt(format!(
                    "malformed record on line {}: {}",
                    index + 1,
                    e
                )))
            }
        };

        if let Some(previous) = last_key {
            if record.key <= previous {
                return Err(StorageError::Corrupt(format!(
                    "key {} on line {} does not follow key {}",
                    record.key,
                    index + 1,
                    previous
                )));
            }
        }

        last_key = Some(record.key);
        records.push((record.key, record.value));
        valid_len += raw.len();
        missing_newline = !terminated;
    }

    Ok(RecoveredJournal {
        records,
        last_key,
        file_len: contents.len() as u64,
        valid_len: valid_len as u64,
        missing_newline,
    })
}
