//! Configuration module
//!
//! Settings for the storage backend, the drain loop and logging. Everything is read
//! from `ORDERLY_*` environment variables (a `.env` file is honored).

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::DEFAULT_COMPACT_THRESHOLD;
use crate::storage_types::StorageBackend;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Queue configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub storage_backend: StorageBackend,
    /// Directory holding the journal. Required for the file backend.
    pub journal_path: Option<PathBuf>,
    /// Sync the journal to disk before `enqueue` returns.
    pub sync_writes: bool,
    /// Acknowledgements between journal rewrites.
    pub compact_threshold: usize,
    /// Re-attempt a failed head item after this long even without a new send.
    /// `None` keeps the drain loop asleep until the next wake.
    pub retry_interval: Option<Duration>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            journal_path: None,
            sync_writes: true,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            retry_interval: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let storage_backend = match lookup("ORDERLY_STORAGE_BACKEND") {
            Some(raw) => raw.parse::<StorageBackend>()?,
            None => defaults.storage_backend,
        };

        let journal_path = lookup("ORDERLY_JOURNAL_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let sync_writes = match lookup("ORDERLY_SYNC_WRITES") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                anyhow::anyhow!("ORDERLY_SYNC_WRITES must be a boolean, got '{}'", raw)
            })?,
            None => defaults.sync_writes,
        };

        let compact_threshold = match lookup("ORDERLY_COMPACT_THRESHOLD") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                anyhow::anyhow!("ORDERLY_COMPACT_THRESHOLD is not a valid number: {}", e)
            })?,
            None => defaults.compact_threshold,
        };

        let retry_interval_ms = match lookup("ORDERLY_RETRY_INTERVAL_MS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                anyhow::anyhow!("ORDERLY_RETRY_INTERVAL_MS is not a valid number: {}", e)
            })?,
            None => 0,
        };
        let retry_interval = (retry_interval_ms > 0).then(|| Duration::from_millis(retry_interval_ms));

        let log_format = match lookup("ORDERLY_LOG_FORMAT") {
            Some(raw) => raw.parse::<LogFormat>()?,
            None => defaults.log_format,
        };

        let config = Self {
            storage_backend,
            journal_path,
            sync_writes,
            compact_threshold,
            retry_interval,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.storage_backend == StorageBackend::File && self.journal_path.is_none() {
            return Err(anyhow::anyhow!(
                "ORDERLY_STORAGE_BACKEND=file requires ORDERLY_JOURNAL_PATH to be set"
            ));
        }

        if self.compact_threshold == 0 {
            return Err(anyhow::anyhow!(
                "ORDERLY_COMPACT_THRESHOLD must be greater than zero"
            ));
        }

        Ok(())
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.storage_backend
    }

    pub fn journal_path(&self) -> Option<&std::path::Path> {
        self.journal_path.as_deref()
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert!(config.journal_path.is_none());
        assert!(config.sync_writes);
        assert_eq!(config.compact_threshold, DEFAULT_COMPACT_THRESHOLD);
        assert!(config.retry_interval.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_file_backend_reads_all_settings() {
        let config = config_from(&[
            ("ORDERLY_STORAGE_BACKEND", "file"),
            ("ORDERLY_JOURNAL_PATH", "/var/lib/orderly"),
            ("ORDERLY_SYNC_WRITES", "off"),
            ("ORDERLY_COMPACT_THRESHOLD", "16"),
            ("ORDERLY_RETRY_INTERVAL_MS", "250"),
            ("ORDERLY_LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.storage_backend(), StorageBackend::File);
        assert_eq!(
            config.journal_path(),
            Some(std::path::Path::new("/var/lib/orderly"))
        );
        assert!(!config.sync_writes);
        assert_eq!(config.compact_threshold, 16);
        assert_eq!(config.retry_interval(), Some(Duration::from_millis(250)));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_zero_retry_interval_disables_retries() {
        let config = config_from(&[("ORDERLY_RETRY_INTERVAL_MS", "0")]).unwrap();
        assert!(config.retry_interval.is_none());
    }

    #[test]
    fn test_file_backend_requires_journal_path() {
        let err = config_from(&[("ORDERLY_STORAGE_BACKEND", "file")]).unwrap_err();
        assert!(err.to_string().contains("ORDERLY_JOURNAL_PATH"));
    }

    #[test]
    fn test_blank_journal_path_counts_as_missing() {
        assert!(config_from(&[
            ("ORDERLY_STORAGE_BACKEND", "file"),
            ("ORDERLY_JOURNAL_PATH", "  "),
        ])
        .is_err());
    }

    #[test]
    fn test_zero_compact_threshold_rejected() {
        assert!(config_from(&[("ORDERLY_COMPACT_THRESHOLD", "0")]).is_err());
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(config_from(&[("ORDERLY_SYNC_WRITES", "maybe")]).is_err());
        assert!(config_from(&[("ORDERLY_RETRY_INTERVAL_MS", "soon")]).is_err());
        assert!(config_from(&[("ORDERLY_LOG_FORMAT", "xml")]).is_err());
        assert!(config_from(&[("ORDERLY_STORAGE_BACKEND", "s3")]).is_err());
    }
}
