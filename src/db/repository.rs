//! Repository pattern for database operations.
//!
//! [`Repository`] wraps the pool and owns the operations that run on their own
//! (cursor maintenance, status queries, cleaning). Operations that must join
//! the tick or rollback transaction are free functions taking a
//! `&mut SqliteConnection`, so a whole tick commits or aborts as one unit.

use alloy::primitives::B256;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info, instrument, warn};

use super::models::{hash_key, sql_int, AppliedEventRecord, BlockRecordRow, CursorRecord};
use crate::abi::{BlockInfo, DecodedEvent};
use crate::cursor::Cursor;
use crate::error::{IndexerError, IndexerResult};
use crate::reorg::BlockRecord;

/// Entity tables in an order that satisfies foreign keys when deleting.
const ENTITY_TABLES: [&str; 8] = [
    "oracle_owner_history",
    "orders",
    "outcome_token_balances",
    "markets",
    "outcome_tokens",
    "event_contracts",
    "centralized_oracles",
    "tournament_participants",
];

/// Repository for database operations.
///
/// Wraps a SQLite connection pool and provides type-safe methods
/// for the indexer bookkeeping.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Creates a new repository with the given connection pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Starts a transaction for a tick or a rollback.
    ///
    /// # Errors
    ///
    /// Returns a database error if no connection is available.
    pub async fn begin(&self) -> IndexerResult<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|e| {
            IndexerError::database("Failed to start transaction", Some(Box::new(e)))
        })
    }

    /// Verifies the database answers queries.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn health_check(&self) -> IndexerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IndexerError::database("Database health check failed", Some(Box::new(e)))
            })?;
        Ok(())
    }

    // ==================== CURSOR OPERATIONS ====================

    /// Creates the cursor row at `start_block` unless it already exists, and
    /// returns the stored cursor.
    ///
    /// # Errors
    ///
    /// Returns a database error if the row cannot be written or read.
    pub async fn ensure_cursor(&self, start_block: u64) -> IndexerResult<Cursor> {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO indexer_cursor
                (id, last_processed_block, last_error_block, locked, updated_at)
            VALUES (1, ?, NULL, 0, ?)
            ",
        )
        .bind(sql_int(start_block))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to initialise cursor", Some(Box::new(e))))?;

        self.get_cursor()
            .await?
            .ok_or_else(|| IndexerError::state("Cursor row missing after initialisation", None))
    }

    /// Reads the cursor. Returns `None` before the first run.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn get_cursor(&self) -> IndexerResult<Option<Cursor>> {
        let record = sqlx::query_as::<_, CursorRecord>(
            "SELECT last_processed_block, last_error_block, locked, updated_at \
             FROM indexer_cursor WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to query cursor", Some(Box::new(e))))?;

        Ok(record.map(Cursor::from))
    }

    /// Sets or clears the maintenance lock.
    ///
    /// # Errors
    ///
    /// Returns a state error if the cursor has not been initialised.
    #[instrument(skip(self))]
    pub async fn set_locked(&self, locked: bool) -> IndexerResult<()> {
        let result =
            sqlx::query("UPDATE indexer_cursor SET locked = ?, updated_at = ? WHERE id = 1")
                .bind(locked)
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    IndexerError::database("Failed to update cursor lock", Some(Box::new(e)))
                })?;

        if result.rows_affected() == 0 {
            return Err(IndexerError::state("Cursor not initialised", None));
        }
        info!(locked, "Cursor lock updated");
        Ok(())
    }

    /// Records the first block of a failed tick.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    pub async fn record_error_block(&self, block: u64) -> IndexerResult<()> {
        sqlx::query("UPDATE indexer_cursor SET last_error_block = ?, updated_at = ? WHERE id = 1")
            .bind(sql_int(block))
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IndexerError::database("Failed to record error block", Some(Box::new(e)))
            })?;
        Ok(())
    }

    /// Moves the cursor to `block`, clearing the error block and the block
    /// hashes above it. Entities and the ledger are left untouched.
    ///
    /// # Errors
    ///
    /// Returns a database error if the transaction fails.
    #[instrument(skip(self))]
    pub async fn resync(&self, block: u64) -> IndexerResult<()> {
        let mut tx = self.begin().await?;
        set_cursor(&mut tx, block).await?;
        delete_block_records_above(&mut tx, block).await?;
        commit(tx).await?;
        info!(block, "Cursor resynced");
        Ok(())
    }

    // ==================== MAINTENANCE OPERATIONS ====================

    /// Deletes every derived entity, the ledger and the block hashes, and puts
    /// the cursor back to `start_block`. The lock flag is preserved.
    ///
    /// # Errors
    ///
    /// Returns a database error if the transaction fails.
    #[instrument(skip(self))]
    pub async fn clean(&self, start_block: u64) -> IndexerResult<()> {
        let mut tx = self.begin().await?;

        for table in ENTITY_TABLES.iter().chain(&["applied_events", "block_records"]) {
            let deleted = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    IndexerError::database(format!("Failed to clean {table}"), Some(Box::new(e)))
                })?
                .rows_affected();
            debug!(table, deleted, "Table cleaned");
        }

        sqlx::query(
            r"
            INSERT INTO indexer_cursor
                (id, last_processed_block, last_error_block, locked, updated_at)
            VALUES (1, ?, NULL, 0, ?)
            ON CONFLICT (id) DO UPDATE SET
                last_processed_block = excluded.last_processed_block,
                last_error_block = NULL,
                updated_at = excluded.updated_at
            ",
        )
        .bind(sql_int(start_block))
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::database("Failed to reset cursor", Some(Box::new(e))))?;

        commit(tx).await?;
        info!(start_block, "Derived state cleaned");
        Ok(())
    }

    /// Row counts of the entity tables and the ledger, for status output.
    ///
    /// # Errors
    ///
    /// Returns a database error if a count fails.
    pub async fn table_counts(&self) -> IndexerResult<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(ENTITY_TABLES.len() + 1);
        for table in ENTITY_TABLES.iter().chain(&["applied_events"]) {
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    IndexerError::database(format!("Failed to count {table}"), Some(Box::new(e)))
                })?;
            counts.push((*table, count));
        }
        Ok(counts)
    }

    // ==================== BLOCK RECORD OPERATIONS ====================

    /// Stored block hashes in ascending block order.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails or a stored hash is invalid.
    pub async fn block_records(&self) -> IndexerResult<Vec<BlockRecord>> {
        let rows = sqlx::query_as::<_, BlockRecordRow>(
            "SELECT number, hash, parent_hash, timestamp FROM block_records ORDER BY number ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to query block records", Some(Box::new(e))))?;

        rows.into_iter().map(BlockRecord::try_from).collect()
    }
}

/// Commits a transaction.
///
/// # Errors
///
/// Returns a database error if the commit fails.
pub async fn commit(tx: Transaction<'static, Sqlite>) -> IndexerResult<()> {
    tx.commit()
        .await
        .map_err(|e| IndexerError::database("Failed to commit transaction", Some(Box::new(e))))
}

/// Moves the cursor to `block` and clears the error block.
///
/// # Errors
///
/// Returns a state error if the cursor has not been initialised.
pub async fn set_cursor(conn: &mut SqliteConnection, block: u64) -> IndexerResult<()> {
    let result = sqlx::query(
        "UPDATE indexer_cursor \
         SET last_processed_block = ?, last_error_block = NULL, updated_at = ? WHERE id = 1",
    )
    .bind(sql_int(block))
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *conn)
    .await
    .map_err(|e| IndexerError::database("Failed to move cursor", Some(Box::new(e))))?;

    if result.rows_affected() == 0 {
        return Err(IndexerError::state("Cursor not initialised", None));
    }
    Ok(())
}

/// Stores the hash of an applied block.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn insert_block_record(
    conn: &mut SqliteConnection,
    block: &BlockRecord,
) -> IndexerResult<()> {
    sqlx::query(
        r"
        INSERT INTO block_records (number, hash, parent_hash, timestamp)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (number) DO UPDATE SET
            hash = excluded.hash,
            parent_hash = excluded.parent_hash,
            timestamp = excluded.timestamp
        ",
    )
    .bind(sql_int(block.number))
    .bind(hash_key(&block.hash))
    .bind(hash_key(&block.parent_hash))
    .bind(sql_int(block.timestamp))
    .execute(&mut *conn)
    .await
    .map_err(|e| IndexerError::database("Failed to insert block record", Some(Box::new(e))))?;
    Ok(())
}

/// Keeps only the block hashes newer than `head - window`.
///
/// # Errors
///
/// Returns a database error if the delete fails.
pub async fn prune_block_records(
    conn: &mut SqliteConnection,
    head: u64,
    window: u64,
) -> IndexerResult<u64> {
    let pruned = sqlx::query("DELETE FROM block_records WHERE number <= ?")
        .bind(sql_int(head.saturating_sub(window)))
        .execute(&mut *conn)
        .await
        .map_err(|e| IndexerError::database("Failed to prune block records", Some(Box::new(e))))?
        .rows_affected();
    Ok(pruned)
}

/// Drops the block hashes above `block`.
///
/// # Errors
///
/// Returns a database error if the delete fails.
pub async fn delete_block_records_above(
    conn: &mut SqliteConnection,
    block: u64,
) -> IndexerResult<u64> {
    let deleted = sqlx::query("DELETE FROM block_records WHERE number > ?")
        .bind(sql_int(block))
        .execute(&mut *conn)
        .await
        .map_err(|e| IndexerError::database("Failed to delete block records", Some(Box::new(e))))?
        .rows_affected();
    Ok(deleted)
}

// ==================== LEDGER OPERATIONS ====================

/// An applied event about to be written to the ledger.
#[derive(Debug, Clone, Copy)]
pub struct LedgerEntry<'a> {
    /// Contract role the event was routed to
    pub role: &'a str,
    /// The decoded event
    pub event: &'a DecodedEvent,
    /// Table of the affected entity
    pub entity: &'a str,
    /// Rendered identity of the affected entity
    pub entity_key: &'a str,
    /// Block context
    pub block: BlockInfo,
    /// Hash of the block the event was applied from
    pub block_hash: B256,
}

/// Appends an applied event to the ledger, returning its position.
///
/// # Errors
///
/// Returns a database error if serialisation or the insert fails.
pub async fn insert_applied_event(
    conn: &mut SqliteConnection,
    entry: LedgerEntry<'_>,
) -> IndexerResult<i64> {
    let event_json = serde_json::to_string(entry.event).map_err(|e| {
        IndexerError::database("Failed to serialise applied event", Some(Box::new(e)))
    })?;

    let result = sqlx::query(
        r"
        INSERT INTO applied_events (
            role, event_name, address, event_json, entity, entity_key,
            block_number, block_hash, block_timestamp, applied_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(entry.role)
    .bind(&entry.event.name)
    .bind(super::models::address_key(&entry.event.address))
    .bind(event_json)
    .bind(entry.entity)
    .bind(entry.entity_key)
    .bind(sql_int(entry.block.number))
    .bind(hash_key(&entry.block_hash))
    .bind(sql_int(entry.block.timestamp))
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *conn)
    .await
    .map_err(|e| IndexerError::database("Failed to insert applied event", Some(Box::new(e))))?;

    Ok(result.last_insert_rowid())
}

/// Ledger entries above `block`, newest application first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn applied_events_above(
    conn: &mut SqliteConnection,
    block: u64,
) -> IndexerResult<Vec<AppliedEventRecord>> {
    sqlx::query_as::<_, AppliedEventRecord>(
        "SELECT * FROM applied_events WHERE block_number > ? ORDER BY id DESC",
    )
    .bind(sql_int(block))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| IndexerError::database("Failed to query applied events", Some(Box::new(e))))
}

/// Drops the ledger entries, and the oracle owner history they carry, at or
/// below `head - window`. A reorg that deep is beyond the window and can no
/// longer be rolled back.
///
/// # Errors
///
/// Returns a database error if a delete fails.
pub async fn prune_applied_events(
    conn: &mut SqliteConnection,
    head: u64,
    window: u64,
) -> IndexerResult<u64> {
    let boundary = sql_int(head.saturating_sub(window));
    sqlx::query("DELETE FROM oracle_owner_history WHERE block_number <= ?")
        .bind(boundary)
        .execute(&mut *conn)
        .await
        .map_err(|e| IndexerError::database("Failed to prune owner history", Some(Box::new(e))))?;

    let pruned = sqlx::query("DELETE FROM applied_events WHERE block_number <= ?")
        .bind(boundary)
        .execute(&mut *conn)
        .await
        .map_err(|e| IndexerError::database("Failed to prune applied events", Some(Box::new(e))))?
        .rows_affected();
    Ok(pruned)
}

/// Removes one ledger entry after its event has been rolled back.
///
/// # Errors
///
/// Returns a database error if the delete fails.
pub async fn delete_applied_event(conn: &mut SqliteConnection, id: i64) -> IndexerResult<()> {
    let result = sqlx::query("DELETE FROM applied_events WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| IndexerError::database("Failed to delete applied event", Some(Box::new(e))))?;

    if result.rows_affected() == 0 {
        warn!(id, "Ledger entry already gone");
    }
    Ok(())
}
