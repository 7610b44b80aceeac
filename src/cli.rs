//! Command-line interface for the prediction-market event indexer.
//!
//! # Commands
//!
//! - `run`: tick loop with graceful Ctrl-C shutdown
//! - `tick`: a single tick
//! - `status`: cursor, lock flag, last error block and row counts
//! - `resync --block N`: move the cursor (the loop must be stopped)
//! - `clean`: drop all derived state and reset the cursor
//! - `lock` / `unlock`: maintenance gate, ticks are skipped while locked
//! - `watches`: configured watch entries and their resolved address counts
//!
//! # Example
//!
//! ```bash
//! pm-event-indexer run --interval 12
//! pm-event-indexer resync --block 4500000
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::time::Duration;
use tracing::{error, info};

use crate::abi::BlockInfo;
use crate::config::Config;
use crate::db::create_pool;
use crate::db::repository::Repository;
use crate::error::{IndexerError, IndexerResult};
use crate::indexer::{Indexer, TickOutcome};
use crate::rpc::{check_connection, create_provider, HttpChainClient};
use crate::watch::{AddressSource, WatchRegistry};

/// Prediction-market event indexer
#[derive(Parser, Debug)]
#[command(name = "pm-event-indexer")]
#[command(about = "Indexes prediction-market contract events into SQLite", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the tick loop until Ctrl-C
    Run {
        /// Polling interval in seconds (default: POLL_INTERVAL_SECS)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Run a single tick
    Tick,

    /// Show the cursor and indexed row counts
    Status,

    /// Move the cursor to a block
    Resync {
        /// Last processed block after the resync
        #[arg(short, long)]
        block: u64,
    },

    /// Delete all derived state and reset the cursor to START_BLOCK
    Clean,

    /// Set the maintenance lock
    Lock,

    /// Clear the maintenance lock
    Unlock,

    /// List watch entries
    Watches,
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if configuration loading, the node connection, the
/// database or the command itself fails.
pub async fn run() -> IndexerResult<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run { interval } => run_loop(&config, interval).await,
        Commands::Tick => run_tick(&config).await,
        Commands::Status => show_status(&config).await,
        Commands::Resync { block } => {
            open_repository(&config).await?.resync(block).await?;
            println!("{} cursor moved to block {}", "✅".green(), block.to_string().cyan());
            Ok(())
        }
        Commands::Clean => {
            open_repository(&config).await?.clean(config.start_block()).await?;
            println!(
                "{} derived state cleaned, cursor reset to block {}",
                "✅".green(),
                config.start_block().to_string().cyan()
            );
            Ok(())
        }
        Commands::Lock => set_lock(&config, true).await,
        Commands::Unlock => set_lock(&config, false).await,
        Commands::Watches => show_watches(&config).await,
    }
}

async fn open_repository(config: &Config) -> IndexerResult<Repository> {
    Ok(Repository::new(create_pool(config.database_url()).await?))
}

async fn build_indexer(
    config: &Config,
    interval: Option<u64>,
) -> IndexerResult<Indexer<HttpChainClient>> {
    let watches = WatchRegistry::from_file(config.watch_config())?;
    let repo = open_repository(config).await?;

    let provider = create_provider(config.rpc_url()).await?;
    check_connection(&provider).await?;

    let mut settings = config.indexer_settings();
    if let Some(secs) = interval {
        if secs == 0 {
            return Err(IndexerError::config("--interval must be greater than zero", None));
        }
        settings.poll_interval = Duration::from_secs(secs);
    }
    Ok(Indexer::new(HttpChainClient::new(provider), repo, watches, settings))
}

/// Execute the run command (continuous indexing).
async fn run_loop(config: &Config, interval: Option<u64>) -> IndexerResult<()> {
    let indexer = build_indexer(config, interval).await?;
    println!("{}", "🔍 Indexing prediction-market events...".cyan().bold());
    println!(
        "{} {} watch entries, polling every {:?}",
        "📋".cyan(),
        indexer.watches().entries().len(),
        indexer.settings().poll_interval
    );
    println!();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    match indexer.run(shutdown).await {
        Ok(()) => {
            let cursor = indexer.repository().get_cursor().await?;
            println!();
            println!("{}", "🛑 Shutting down gracefully...".yellow().bold());
            if let Some(cursor) = cursor {
                println!("{} Last processed block: {}", "📍".cyan(), cursor.last_processed_block);
            }
            println!("{}", "👋 Shutdown complete".green().bold());
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "❌ Indexer stopped:".red().bold(), e);
            Err(e)
        }
    }
}

/// Execute the tick command.
async fn run_tick(config: &Config) -> IndexerResult<()> {
    let indexer = build_indexer(config, None).await?;
    let outcome = indexer.tick().await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Locked => {
            println!("{}", "🔒 Cursor is locked, tick skipped".yellow().bold());
        }
        TickOutcome::UpToDate { head } => {
            println!("{} Up to date with head {}", "✅".green(), head.to_string().cyan());
        }
        TickOutcome::Applied { from, to, head, stats } => {
            println!(
                "{} Blocks {}..={} indexed (head {})",
                "📦".cyan(),
                from.to_string().bold(),
                to.to_string().bold(),
                head
            );
            println!(
                "   {} applied, {} dropped, {} undecodable",
                stats.applied.to_string().green(),
                stats.dropped.to_string().yellow(),
                stats.decode_errors.to_string().red()
            );
        }
        TickOutcome::RolledBack(summary) => {
            println!(
                "{} Reorg: rolled back to block {}, {} events undone, {} blocks dropped",
                "⚠️".yellow(),
                summary.fork_point.to_string().bold(),
                summary.undone,
                summary.blocks_dropped
            );
        }
    }
}

/// Execute the status command.
async fn show_status(config: &Config) -> IndexerResult<()> {
    let repo = open_repository(config).await?;

    match repo.get_cursor().await? {
        Some(cursor) => {
            let last = cursor.last_processed_block.to_string();
            println!("{} Last processed block: {}", "📍".cyan(), last.bold());
            let lock = if cursor.locked { "locked".red() } else { "unlocked".green() };
            println!("{} Lock: {}", "🔒".cyan(), lock);
            match cursor.last_error_block {
                Some(block) => {
                    println!("{} Last error block: {}", "⚠️".yellow(), block.to_string().yellow());
                }
                None => println!("{} Last error block: none", "✅".green()),
            }
        }
        None => println!("{}", "Cursor not initialised, run a tick first".yellow()),
    }

    println!();
    for (table, count) in repo.table_counts().await? {
        println!("   {table:<26} {count}");
    }
    Ok(())
}

async fn set_lock(config: &Config, locked: bool) -> IndexerResult<()> {
    let repo = open_repository(config).await?;
    repo.ensure_cursor(config.start_block()).await?;
    repo.set_locked(locked).await?;
    if locked {
        println!("{}", "🔒 Cursor locked".yellow().bold());
    } else {
        println!("{}", "🔓 Cursor unlocked".green().bold());
    }
    Ok(())
}

/// Execute the watches command.
async fn show_watches(config: &Config) -> IndexerResult<()> {
    let watches = WatchRegistry::from_file(config.watch_config())?;
    let repo = open_repository(config).await?;
    let block = repo
        .get_cursor()
        .await?
        .map_or(config.start_block(), |cursor| cursor.last_processed_block);

    let mut conn = repo
        .pool()
        .acquire()
        .await
        .map_err(|e| IndexerError::database("Failed to acquire connection", Some(Box::new(e))))?;

    for entry in watches.entries() {
        let addresses = watches.addresses_for(entry, BlockInfo::new(block, 0), &mut conn).await?;
        let source = match &entry.source {
            AddressSource::Static(_) => "static".normal(),
            AddressSource::Dynamic(source) => source.table().dimmed(),
        };
        let publish = match (entry.publish, &entry.publish_under) {
            (true, Some(group)) => format!("publish as {group}").green(),
            (true, None) => "publish".green(),
            (false, _) => "quiet".dimmed(),
        };
        println!(
            "{} {} [{}] {} addresses ({}) {}",
            "👁".cyan(),
            entry.name.bold(),
            entry.role,
            addresses.len(),
            source,
            publish
        );
    }
    Ok(())
}
