//! CLI entry point for the prediction-market event indexer.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! cli.rs (command dispatch)
//!     ↓
//! indexer.rs → fetcher.rs → dispatch.rs → receivers/ → db/
//!           ↘ reorg/ → rollback.rs
//! ```

use pm_event_indexer::{cli, observability};
use tracing::error;

/// Initializes logging from the environment, then delegates to [`cli::run`].
///
/// - `RUST_LOG`: filter (default `pm_event_indexer=info,warn`)
/// - `LOG_JSON`: JSON console output
/// - `LOG_FILE`: also write JSON logs to a daily rotated file
#[tokio::main]
async fn main() {
    let log_level = std::env::var("RUST_LOG").ok();
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .ok()
        .and_then(|value| value.parse::<bool>().ok())
        .unwrap_or(false);

    // Held until exit so buffered file logs are flushed
    let _log_guard = match observability::init_tracing(log_level, log_file, json_output) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
