//! Shared constants.

/// Key assigned to the first item ever enqueued in a storage.
pub const FIRST_KEY: u64 = 1;

/// File name of the append-only record journal inside a journal directory.
pub const JOURNAL_FILE_NAME: &str = "journal.jsonl";

/// File name of the acknowledged-head pointer inside a journal directory.
pub const HEAD_FILE_NAME: &str = "head";

/// Default number of acknowledgements between journal compactions.
pub const DEFAULT_COMPACT_THRESHOLD: usize = 1024;
