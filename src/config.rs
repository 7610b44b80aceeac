//! Configuration management for the prediction-market event indexer.
//!
//! This module handles loading and validating configuration from environment variables
//! using the `dotenvy` crate. All operations return [`IndexerResult`] for comprehensive
//! error handling.
//!
//! ## Environment Variables
//!
//! Required (one of):
//! - `RPC_URL`: HTTP(S) endpoint of an Ethereum node
//! - `ALCHEMY_API_KEY`: Alchemy API key, used when `RPC_URL` is not set
//!
//! Optional (with defaults):
//! - `DATABASE_URL`: SQLite database (default: "sqlite:./indexer.db")
//! - `WATCH_CONFIG`: Watch entry JSON file (default: "./watch.json")
//! - `START_BLOCK`: Cursor position for a fresh database (default: 0)
//! - `POLL_INTERVAL_SECS`: Tick period (default: 5)
//! - `MAX_BLOCKS_PER_TICK`: Maximum blocks processed per tick (default: 100)
//! - `MAX_WORKERS`: Maximum concurrent RPC requests (default: 8)
//! - `REORG_WINDOW`: Block hashes kept for reorg detection (default: 64)
//! - `RETRY_INITIAL_DELAY_SECS` / `RETRY_MAX_DELAY_SECS`: Tick failure backoff (default: 1 / 60)
//! - `RUST_LOG`: Logging filter (default: "`pm_event_indexer=info,warn`")
//!
//! ## Example
//!
//! ```no_run
//! use pm_event_indexer::config::Config;
//! use pm_event_indexer::error::IndexerResult;
//!
//! # fn main() -> IndexerResult<()> {
//! let config = Config::from_env()?;
//! println!("Database: {}", config.database_url());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IndexerError, IndexerResult};
use crate::indexer::IndexerSettings;

/// Main configuration struct for the indexer.
///
/// Contains all runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Node RPC URL
    rpc_url: String,

    /// SQLite connection string
    database_url: String,

    /// Path to the watch entry JSON file
    watch_config: PathBuf,

    /// Cursor position for a fresh database
    start_block: u64,

    /// Tick period in seconds
    poll_interval_secs: u64,

    /// Maximum blocks processed per tick
    max_blocks_per_tick: u64,

    /// Maximum concurrent RPC requests
    max_workers: usize,

    /// Number of recent block hashes kept for reorg detection
    reorg_window: u64,

    /// First retry delay after a failed tick
    retry_initial_delay_secs: u64,

    /// Upper bound on the retry delay
    retry_max_delay_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This function:
    /// 1. Loads `.env` file using `dotenvy` (if present)
    /// 2. Reads and validates all environment variables
    /// 3. Applies defaults for optional variables
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no node endpoint is configured or a
    /// value cannot be parsed.
    pub fn from_env() -> IndexerResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> IndexerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = match lookup("RPC_URL").filter(|url| !url.is_empty()) {
            Some(url) => url,
            None => {
                let key = lookup("ALCHEMY_API_KEY").ok_or_else(|| {
                    IndexerError::config("RPC_URL or ALCHEMY_API_KEY must be set", None)
                })?;
                if key.is_empty() || key == "your_alchemy_api_key_here" {
                    return Err(IndexerError::config(
                        "ALCHEMY_API_KEY must be set to a valid Alchemy API key",
                        None,
                    ));
                }
                format!("https://eth-mainnet.g.alchemy.com/v2/{key}")
            }
        };

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:./indexer.db".to_string());
        let watch_config = lookup("WATCH_CONFIG")
            .unwrap_or_else(|| "./watch.json".to_string())
            .into();

        let start_block = parse_var(&lookup, "START_BLOCK", 0)?;
        let poll_interval_secs = parse_positive(&lookup, "POLL_INTERVAL_SECS", 5)?;
        let max_blocks_per_tick = parse_positive(&lookup, "MAX_BLOCKS_PER_TICK", 100)?;
        let max_workers = parse_positive(&lookup, "MAX_WORKERS", 8)?;
        let reorg_window = parse_positive(&lookup, "REORG_WINDOW", 64)?;
        let retry_initial_delay_secs = parse_positive(&lookup, "RETRY_INITIAL_DELAY_SECS", 1)?;
        let retry_max_delay_secs = parse_positive(&lookup, "RETRY_MAX_DELAY_SECS", 60)?;

        if retry_max_delay_secs < retry_initial_delay_secs {
            return Err(IndexerError::config(
                format!(
                    "RETRY_MAX_DELAY_SECS ({retry_max_delay_secs}) must not be below RETRY_INITIAL_DELAY_SECS ({retry_initial_delay_secs})"
                ),
                None,
            ));
        }

        Ok(Self {
            rpc_url,
            database_url,
            watch_config,
            start_block,
            poll_interval_secs,
            max_blocks_per_tick,
            max_workers,
            reorg_window,
            retry_initial_delay_secs,
            retry_max_delay_secs,
        })
    }

    /// Get the node RPC URL.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Get the watch configuration path.
    #[must_use]
    pub fn watch_config(&self) -> &Path {
        &self.watch_config
    }

    /// Get the start block for a fresh database.
    #[must_use]
    pub const fn start_block(&self) -> u64 {
        self.start_block
    }

    /// Get the polling interval in seconds.
    #[must_use]
    pub const fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    /// Get the maximum number of blocks per tick.
    #[must_use]
    pub const fn max_blocks_per_tick(&self) -> u64 {
        self.max_blocks_per_tick
    }

    /// Get the maximum number of concurrent RPC requests.
    #[must_use]
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Get the reorg detection window.
    #[must_use]
    pub const fn reorg_window(&self) -> u64 {
        self.reorg_window
    }

    /// Settings for the tick loop.
    #[must_use]
    pub const fn indexer_settings(&self) -> IndexerSettings {
        IndexerSettings {
            start_block: self.start_block,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_blocks_per_tick: self.max_blocks_per_tick,
            max_workers: self.max_workers,
            reorg_window: self.reorg_window,
            retry_initial_delay: Duration::from_secs(self.retry_initial_delay_secs),
            retry_max_delay: Duration::from_secs(self.retry_max_delay_secs),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> IndexerResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            IndexerError::config(
                format!("{key} must be a valid non-negative number, got '{raw}'"),
                Some(Box::new(e)),
            )
        }),
    }
}

fn parse_positive<F, T>(lookup: &F, key: &str, default: T) -> IndexerResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = parse_var(lookup, key, default)?;
    if value == T::default() {
        return Err(IndexerError::config(format!("{key} must be greater than zero"), None));
    }
    Ok(value)
}
