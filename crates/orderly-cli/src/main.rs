//! Orderly CLI: feed, inspect and drain an ordered delivery journal.
//!
//! Storage settings come from `ORDERLY_*` environment variables; `--journal` overrides
//! them with a file journal at the given directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use orderly_cli::{parse_value, PrintHandler};
use orderly_core::{Config, StorageBackend};
use orderly_storage::create_storage;
use orderly_worker::{AutoQueue, AutoQueueConfig, Queue};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "orderly", about = "Ordered delivery queue CLI")]
struct Cli {
    /// Journal directory (selects the file backend)
    #[arg(long, global = true)]
    journal: Option<PathBuf>,
    /// Do not fsync journal writes
    #[arg(long, global = true)]
    no_sync: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append values to the journal without delivering them
    Send {
        /// Values to send; parsed as JSON, otherwise taken as strings
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Show the head item, the next key and the number of pending items
    Inspect,
    /// Deliver pending items to stdout until the journal is empty or an item fails
    Drain {
        /// Decline this value, leaving it at the head
        #[arg(long)]
        fail_on: Option<String>,
    },
    /// Read values from stdin (one per line) and deliver them as they arrive
    Serve {
        /// Decline this value, leaving it at the head
        #[arg(long)]
        fail_on: Option<String>,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

fn require_journal(config: &Config) -> anyhow::Result<()> {
    if config.storage_backend() != StorageBackend::File {
        return Err(anyhow::anyhow!(
            "This command needs a journal. Pass --journal or set ORDERLY_STORAGE_BACKEND=file"
        ));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(journal) = cli.journal {
        config.storage_backend = StorageBackend::File;
        config.journal_path = Some(journal);
    }
    if cli.no_sync {
        config.sync_writes = false;
    }
    config.validate()?;

    orderly_infra::init_telemetry(config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let storage = create_storage::<Value>(&config)
        .await
        .context("Failed to open storage")?;

    match cli.command {
        Commands::Send { values } => {
            require_journal(&config)?;
            let queue = Queue::new(storage);
            let mut keys = Vec::with_capacity(values.len());
            for raw in &values {
                let completion = queue.send(parse_value(raw)).await?;
                keys.push(completion.key());
            }
            print_json(&json!({ "sent": keys }))?;
        }
        Commands::Inspect => {
            require_journal(&config)?;
            let head = storage.try_get_current().await?;
            print_json(&json!({
                "backend": storage.backend_type(),
                "head_key": head.as_ref().map(|item| item.key),
                "head_value": head.map(|item| item.value),
                "pending": storage.len().await,
                "next_key": storage.next_key(),
            }))?;
        }
        Commands::Drain { fail_on } => {
            require_journal(&config)?;
            let handler = PrintHandler::new(fail_on.as_deref().map(parse_value));
            let queue = Queue::new(storage);
            let mut handled = 0usize;
            while queue.try_dequeue(&handler).await? {
                handled += 1;
            }
            print_json(&json!({ "handled": handled, "remaining": queue.len().await }))?;
        }
        Commands::Serve { fail_on } => {
            let handler = PrintHandler::new(fail_on.as_deref().map(parse_value));
            let auto = AutoQueue::with_config(
                Queue::new(storage),
                handler,
                AutoQueueConfig::from(&config),
            );
            // Items recovered from the journal are delivered without waiting for a send.
            auto.wake();

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut outcomes = JoinSet::new();
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Some(line) = line.context("Failed to read stdin")? else {
                            break;
                        };
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let completion = auto.send(parse_value(line)).await?;
                        outcomes.spawn(async move {
                            let key = completion.key();
                            let handled = completion.await;
                            json!({ "key": key, "handled": handled })
                        });
                    }
                    Some(outcome) = outcomes.join_next(), if !outcomes.is_empty() => {
                        print_json(&outcome.context("Completion task failed")?)?;
                    }
                    _ = &mut ctrl_c => {
                        tracing::info!("Interrupted, shutting down");
                        break;
                    }
                }
            }

            auto.shutdown().await;
            while let Some(outcome) = outcomes.join_next().await {
                print_json(&outcome.context("Completion task failed")?)?;
            }
        }
    }

    Ok(())
}
