//! Reverse-order undo of applied events.
//!
//! Every applied event is ledgered with its role, the serialised decoded event
//! and its block context. Rolling back to a fork point walks the ledger rows
//! above that block newest first, hands each event back to the handler it was
//! applied with and deletes the row. Block hashes above the fork point are
//! dropped and the cursor rewinds, all in one transaction.

use sqlx::SqliteConnection;
use tracing::{debug, error, info, instrument};

use crate::abi::{BlockInfo, DecodedEvent};
use crate::db::models::{from_sql_int, AppliedEventRecord};
use crate::db::repository::{
    applied_events_above, commit, delete_applied_event, delete_block_records_above, set_cursor,
    Repository,
};
use crate::error::{IndexerError, IndexerResult};
use crate::receivers::ReceiverRegistry;
use crate::watch::ContractRole;

/// Result of a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Last block that remains applied
    pub fork_point: u64,
    /// Ledgered events undone
    pub undone: usize,
    /// Block hashes dropped
    pub blocks_dropped: u64,
}

/// Undo one ledgered event on `conn`.
///
/// # Errors
///
/// Returns [`IndexerError::EntityNotFound`] if the affected entity is gone, a
/// database error if persistence fails, and [`IndexerError::RollbackFailed`]
/// for every other failure (unknown role or event, unreadable row, state the
/// handler cannot restore).
pub async fn undo_event(
    conn: &mut SqliteConnection,
    receivers: &ReceiverRegistry,
    record: &AppliedEventRecord,
) -> IndexerResult<()> {
    undo_record(conn, receivers, record)
        .await
        .map_err(|e| IndexerError::rollback_failed(record.id, e))
}

async fn undo_record(
    conn: &mut SqliteConnection,
    receivers: &ReceiverRegistry,
    record: &AppliedEventRecord,
) -> IndexerResult<()> {
    let role: ContractRole = record.role.parse()?;
    let handler = receivers.handler(role, &record.event_name).ok_or_else(|| {
        IndexerError::state(
            format!("No receiver for ledgered event {role}/{}", record.event_name),
            None,
        )
    })?;
    let event: DecodedEvent = serde_json::from_str(&record.event_json).map_err(|e| {
        IndexerError::state(
            format!("Ledger entry {} holds an unreadable event", record.id),
            Some(Box::new(e)),
        )
    })?;
    let block =
        BlockInfo::new(from_sql_int(record.block_number), from_sql_int(record.block_timestamp));

    handler.rollback(conn, &event, block).await?;
    debug!(
        id = record.id,
        event = %record.event_name,
        entity = %record.entity,
        key = %record.entity_key,
        block = block.number,
        "Event rolled back"
    );
    Ok(())
}

/// Undo every ledgered event above `fork_point` in strict reverse application
/// order, then rewind block records and the cursor.
///
/// # Errors
///
/// Any failure aborts the whole rollback; nothing is committed. Every failure
/// except a database error is fatal and needs an operator.
#[instrument(skip(repo, receivers))]
pub async fn rollback_to(
    repo: &Repository,
    receivers: &ReceiverRegistry,
    fork_point: u64,
) -> IndexerResult<RollbackSummary> {
    let mut tx = repo.begin().await?;
    let ledger = applied_events_above(&mut tx, fork_point).await?;
    info!(fork_point, events = ledger.len(), "Rolling back applied events");

    for record in &ledger {
        if let Err(e) = undo_event(&mut tx, receivers, record).await {
            error!(
                id = record.id,
                event = %record.event_name,
                key = %record.entity_key,
                block = record.block_number,
                error = %e,
                "Rollback failed"
            );
            return Err(e);
        }
        delete_applied_event(&mut tx, record.id).await?;
    }

    let blocks_dropped = delete_block_records_above(&mut tx, fork_point).await?;
    set_cursor(&mut tx, fork_point).await?;
    commit(tx).await?;

    let summary = RollbackSummary {
        fork_point,
        undone: ledger.len(),
        blocks_dropped,
    };
    info!(?summary, "Rollback complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    async fn ledger_row(repo: &Repository, role: &str, event_name: &str, event_json: &str) {
        let mut conn = repo.pool().acquire().await.unwrap();
        sqlx::query(
            r"
            INSERT INTO applied_events (
                role, event_name, address, event_json, entity, entity_key,
                block_number, block_hash, block_timestamp, applied_at
            )
            VALUES (?, ?, '0x00', ?, 'markets', '0x00', 5, '0x00', 0, 0)
            ",
        )
        .bind(role)
        .bind(event_name)
        .bind(event_json)
        .execute(&mut *conn)
        .await
        .unwrap();
    }

    async fn ledger_len(repo: &Repository) -> i64 {
        let mut conn = repo.pool().acquire().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM applied_events")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn test_unreadable_ledger_row_stops_rollback() {
        let repo = Repository::new(create_memory_pool().await.unwrap());
        repo.ensure_cursor(5).await.unwrap();
        ledger_row(&repo, "market", "MarketClosing", "not json").await;

        let err = rollback_to(&repo, &ReceiverRegistry::new(), 4).await.unwrap_err();
        assert!(matches!(err, IndexerError::RollbackFailed { .. }), "got {err:?}");
        assert!(err.is_fatal());
        assert_eq!(ledger_len(&repo).await, 1);
        assert_eq!(repo.get_cursor().await.unwrap().unwrap().last_processed_block, 5);
    }

    #[tokio::test]
    async fn test_ledger_row_without_receiver_stops_rollback() {
        let repo = Repository::new(create_memory_pool().await.unwrap());
        repo.ensure_cursor(5).await.unwrap();
        ledger_row(&repo, "market", "Approval", "{}").await;

        let err = rollback_to(&repo, &ReceiverRegistry::new(), 4).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Approval"));
    }
}
