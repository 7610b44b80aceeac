//! Database module for the indexed prediction-market state.
//!
//! This module provides SQLite-based storage for:
//! - Entities written by the event receivers (oracles, events, markets, ...)
//! - The applied-event ledger walked backwards on rollback
//! - Recent block hashes for reorg detection
//! - The chain cursor
//!
//! # Architecture
//!
//! - `models`: Data structures that map to database tables
//! - `repository`: cursor, ledger and maintenance operations
//! - Connection pooling with SQLite WAL mode for concurrency
//! - Migration system for schema versioning

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{IndexerError, IndexerResult};

pub mod models;
pub mod repository;

/// Tables every deployment must have after migrating.
const REQUIRED_TABLES: [&str; 10] = [
    "centralized_oracles",
    "event_contracts",
    "outcome_tokens",
    "outcome_token_balances",
    "markets",
    "orders",
    "tournament_participants",
    "indexer_cursor",
    "block_records",
    "applied_events",
];

/// Creates a SQLite connection pool with optimized settings.
///
/// # Configuration
///
/// - **WAL mode**: Enables concurrent readers during writes
/// - **Busy timeout**: 30 seconds to handle lock contention
/// - **Max connections**: 5 (suitable for single-machine indexer)
/// - **Foreign keys**: enforced on every connection
///
/// # Example
///
/// ```no_run
/// use pm_event_indexer::db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool("sqlite:./indexer.db").await?;
///     // Use pool for queries
///     Ok(())
/// }
/// ```
pub async fn create_pool(database_url: &str) -> IndexerResult<SqlitePool> {
    info!(database_url, "Connecting to database");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to parse database URL: {database_url}"),
                Some(Box::new(e)),
            )
        })?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to connect to database at {database_url}"),
                Some(Box::new(e)),
            )
        })?;

    info!("Running database migrations");
    run_migrations(&pool).await?;
    verify_database(&pool).await?;
    info!("Database migrations complete");

    Ok(pool)
}

/// Creates a migrated in-memory database.
///
/// Every connection to `sqlite::memory:` opens a separate database, so the pool
/// is pinned to one connection that is never recycled.
///
/// # Errors
///
/// Returns a database error if the connection or the migrations fail.
pub async fn create_memory_pool() -> IndexerResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| IndexerError::database("Invalid in-memory URL", Some(Box::new(e))))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| {
            IndexerError::database("Failed to open in-memory database", Some(Box::new(e)))
        })?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Runs database migrations to ensure schema is up-to-date.
///
/// This function applies all pending migrations from the `migrations/` directory.
/// Migrations are applied in order and are idempotent (safe to run multiple times).
///
/// # Errors
///
/// Returns a database error if a migration fails.
pub async fn run_migrations(pool: &SqlitePool) -> IndexerResult<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        IndexerError::database("Failed to run database migrations", Some(Box::new(e)))
    })?;

    Ok(())
}

/// Verify that required tables exist after migrations.
///
/// # Errors
///
/// Returns a database error naming the first missing table.
pub async fn verify_database(pool: &SqlitePool) -> IndexerResult<()> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT name FROM sqlite_master WHERE type = 'table'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| IndexerError::database("Failed to verify database schema", Some(Box::new(e))))?;

    let present: Vec<&str> = rows.iter().map(|(name,)| name.as_str()).collect();
    if let Some(missing) = REQUIRED_TABLES.iter().find(|table| !present.contains(*table)) {
        return Err(IndexerError::database(
            format!("Database schema incomplete, missing table {missing}"),
            None,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_is_migrated() {
        let pool = create_memory_pool().await.expect("Failed to create pool");
        verify_database(&pool).await.expect("Schema incomplete");
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_memory_pool().await.expect("Failed to create pool");

        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("Failed to query foreign keys");

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_file_pool_uses_wal() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let url = format!("sqlite:{}", dir.path().join("indexer.db").display());
        let pool = create_pool(&url).await.expect("Failed to create pool");

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("Failed to query journal mode");

        assert_eq!(result.0, "wal");
    }
}
