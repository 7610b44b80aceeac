//! Observability and structured logging infrastructure.
//!
//! Logging goes through `tracing`. Every tick runs in a span, applied and
//! dropped events are logged with their block number and entity key, and a
//! rollback logs the fork point and the number of undone events.
//!
//! # Usage
//!
//! ```no_run
//! use pm_event_indexer::observability;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Keep the guard alive for the whole process, it flushes the file writer
//! let _guard = observability::init_tracing(None, None, false)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Configuration
//!
//! ```bash
//! # Component-specific levels
//! RUST_LOG=pm_event_indexer=debug,sqlx=warn cargo run -- run
//!
//! # JSON output for log aggregation
//! LOG_JSON=true cargo run -- run
//!
//! # Also write JSON logs to a daily rotated file
//! LOG_FILE=./logs/indexer.log cargo run -- run
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{IndexerError, IndexerResult};

/// Filter used when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_FILTER: &str = "pm_event_indexer=info,warn";

/// Build the filter: `RUST_LOG` first, then `log_level`, then [`DEFAULT_FILTER`].
#[must_use]
pub fn env_filter(log_level: Option<&str>) -> EnvFilter {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        EnvFilter::new(filter)
    } else if let Some(level) = log_level {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(DEFAULT_FILTER)
    }
}

/// Initialize the tracing subscriber.
///
/// * `log_level` - filter override when `RUST_LOG` is unset
/// * `log_file` - also write JSON logs to this file, rotated daily
/// * `json_output` - JSON console output instead of the pretty format
///
/// Returns the file writer guard when file logging is enabled; dropping it
/// stops the background writer.
///
/// # Errors
///
/// Returns a configuration error if the log directory cannot be created or a
/// global subscriber is already installed.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> IndexerResult<Option<WorkerGuard>> {
    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let (file_layer, guard) = match &log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory).map_err(|e| {
                IndexerError::config(
                    format!("Failed to create log directory {}", directory.display()),
                    Some(Box::new(e)),
                )
            })?;
            let appender = tracing_appender::rolling::daily(
                directory,
                path.file_name().unwrap_or_else(|| OsStr::new("indexer.log")),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(log_level.as_deref()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| IndexerError::config("Failed to initialize tracing", Some(Box::new(e))))?;

    info!(json_output, file_logging = log_file.is_some(), "Tracing initialized");
    Ok(guard)
}

/// Route logs to the test harness. Safe to call from every test.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("pm_event_indexer=debug"))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        init_test_tracing();
        let result = init_tracing(Some("debug".to_string()), None, false);
        assert!(matches!(result, Err(IndexerError::ConfigError { .. })));
    }

    #[test]
    fn test_explicit_level_filter() {
        if std::env::var("RUST_LOG").is_err() {
            use tracing_subscriber::filter::LevelFilter;
            assert_eq!(env_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
            assert_eq!(env_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        }
    }
}
