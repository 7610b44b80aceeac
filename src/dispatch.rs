//! Event dispatch: filter → decode → route → ledger.
//!
//! For every log of a block, in order:
//! 1. find the watch entries whose address set contains the log's address
//! 2. decode the log once with the shared decoder (unknown signatures are
//!    skipped silently, malformed payloads are logged and skipped)
//! 3. route the event to the handler registered for each entry's role
//! 4. append an applied-event ledger row for every entity the handler touched
//!
//! Each handler runs inside a savepoint, so an event rejected with a
//! validation error leaves no partial writes behind. Any other error aborts
//! the block, and with it the tick transaction.

use alloy::primitives::B256;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

use crate::abi::{BlockInfo, DecodedEvent, RawLog};
use crate::db::repository::{insert_applied_event, LedgerEntry};
use crate::error::IndexerResult;
use crate::fetcher::FetchedBlock;
use crate::receivers::{EntityRef, ReceiverRegistry};
use crate::watch::{WatchEntry, WatchRegistry};

/// Counters for one dispatched block or range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Logs emitted by a watched address
    pub watched_logs: usize,
    /// Logs decoded against a registered event
    pub decoded: usize,
    /// Logs skipped because their payload could not be decoded
    pub decode_errors: usize,
    /// Events applied and ledgered
    pub applied: usize,
    /// Events rejected by validation
    pub dropped: usize,
}

impl DispatchStats {
    /// Add another block's counters.
    pub fn merge(&mut self, other: Self) {
        self.watched_logs += other.watched_logs;
        self.decoded += other.decoded;
        self.decode_errors += other.decode_errors;
        self.applied += other.applied;
        self.dropped += other.dropped;
    }
}

/// Routes decoded events to receivers.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher<'a> {
    watches: &'a WatchRegistry,
    receivers: &'a ReceiverRegistry,
}

impl<'a> Dispatcher<'a> {
    /// Dispatcher over the configured watches and receivers.
    #[must_use]
    pub const fn new(watches: &'a WatchRegistry, receivers: &'a ReceiverRegistry) -> Self {
        Self { watches, receivers }
    }

    /// Apply every watched log of `block` on `conn`.
    ///
    /// # Errors
    ///
    /// Returns the first non-validation error; the caller must abort the
    /// enclosing transaction.
    pub async fn dispatch_block(
        &self,
        conn: &mut SqliteConnection,
        block: &FetchedBlock,
    ) -> IndexerResult<DispatchStats> {
        let info = block.info();
        let mut stats = DispatchStats::default();
        for log in &block.logs {
            self.dispatch_log(conn, log, info, block.block.hash, &mut stats).await?;
        }
        if stats.watched_logs > 0 {
            debug!(
                block = info.number,
                watched = stats.watched_logs,
                applied = stats.applied,
                dropped = stats.dropped,
                "Block dispatched"
            );
        }
        Ok(stats)
    }

    async fn dispatch_log(
        &self,
        conn: &mut SqliteConnection,
        log: &RawLog,
        info: BlockInfo,
        block_hash: B256,
        stats: &mut DispatchStats,
    ) -> IndexerResult<()> {
        let entries = self.watches.entries_watching(log.address, info, conn).await?;
        if entries.is_empty() {
            return Ok(());
        }
        stats.watched_logs += 1;

        let event = match self.watches.decoder().decode_log(log) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(
                    address = %log.address,
                    tx = %log.transaction_hash,
                    log_index = log.log_index,
                    error = %e,
                    "Skipping undecodable log"
                );
                stats.decode_errors += 1;
                return Ok(());
            }
        };
        stats.decoded += 1;

        for entry in entries {
            match self.dispatch(conn, entry, &event, info, block_hash).await {
                Ok(Some(entity)) => {
                    stats.applied += 1;
                    if entry.publish {
                        info!(
                            group = entry.publish_under.as_deref().unwrap_or(&entry.name),
                            event = %event.name,
                            %entity,
                            block = info.number,
                            "Event published"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_validation() => {
                    stats.dropped += 1;
                    warn!(
                        watch = %entry.name,
                        block = info.number,
                        error = %e,
                        event = %event.to_log_json(),
                        "Event dropped"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Route one decoded event to the handler of `entry`'s role and ledger it.
    ///
    /// Returns `Ok(None)` when the role has no handler for the event or the
    /// handler applied nothing.
    ///
    /// # Errors
    ///
    /// Validation errors are returned with the savepoint rolled back; other
    /// errors leave the savepoint to be discarded with the transaction.
    pub async fn dispatch(
        &self,
        conn: &mut SqliteConnection,
        entry: &WatchEntry,
        event: &DecodedEvent,
        info: BlockInfo,
        block_hash: B256,
    ) -> IndexerResult<Option<EntityRef>> {
        let Some(handler) = self.receivers.handler(entry.role, &event.name) else {
            debug!(role = %entry.role, event = %event.name, "No receiver for event");
            return Ok(None);
        };

        let mut savepoint = conn.begin().await?;
        let applied = match handler.save(&mut savepoint, event, info).await {
            Ok(applied) => applied,
            Err(e) => {
                savepoint.rollback().await?;
                return Err(e);
            }
        };

        if let Some(entity) = &applied {
            insert_applied_event(
                &mut savepoint,
                LedgerEntry {
                    role: entry.role.as_str(),
                    event,
                    entity: entity.entity,
                    entity_key: &entity.key,
                    block: info,
                    block_hash,
                },
            )
            .await?;
        }
        savepoint.commit().await?;
        Ok(applied)
    }
}
