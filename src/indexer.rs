//! The tick loop.
//!
//! A tick runs inside one critical section shared with rollbacks:
//!
//! 1. read the cursor; a locked cursor skips the tick
//! 2. check the newest recorded block hash against the node and roll back to
//!    the fork point on a reorg
//! 3. fetch `last_processed_block + 1 ..= min(head, last + max_blocks_per_tick)`
//! 4. dispatch every block, record its hash, prune the window and advance the
//!    cursor, all in one transaction
//!
//! A failure at any step leaves the cursor where it was and records the first
//! block of the failed range; the next tick redelivers it.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::cursor::{Cursor, TickPhase};
use crate::db::repository::{
    commit, insert_block_record, prune_applied_events, prune_block_records, set_cursor, Repository,
};
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::error::{IndexerError, IndexerResult};
use crate::fetcher::{verify_linkage, FetchedBlock, Fetcher};
use crate::receivers::ReceiverRegistry;
use crate::reorg::ReorgDetector;
use crate::rollback::{rollback_to, RollbackSummary};
use crate::rpc::ChainClient;
use crate::watch::WatchRegistry;

/// Runtime knobs of the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerSettings {
    /// Cursor position for a fresh database
    pub start_block: u64,
    /// Delay between ticks once caught up
    pub poll_interval: Duration,
    /// Upper bound on the blocks processed by one tick
    pub max_blocks_per_tick: u64,
    /// Maximum concurrent RPC requests
    pub max_workers: usize,
    /// Number of recent block hashes kept for reorg detection
    pub reorg_window: u64,
    /// First retry delay after a failed tick
    pub retry_initial_delay: Duration,
    /// Upper bound on the retry delay
    pub retry_max_delay: Duration,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval: Duration::from_secs(5),
            max_blocks_per_tick: 100,
            max_workers: 8,
            reorg_window: 64,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
        }
    }
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The cursor is locked for maintenance
    Locked,
    /// Nothing to fetch
    UpToDate {
        /// Chain head seen by the tick
        head: u64,
    },
    /// A range was applied and the cursor advanced
    Applied {
        /// First applied block
        from: u64,
        /// Last applied block, the new cursor position
        to: u64,
        /// Chain head seen by the tick
        head: u64,
        /// Dispatch counters for the range
        stats: DispatchStats,
    },
    /// A reorg was detected and undone
    RolledBack(RollbackSummary),
}

impl TickOutcome {
    /// Whether another tick should follow immediately.
    #[must_use]
    pub const fn is_catching_up(&self) -> bool {
        match self {
            Self::Applied { to, head, .. } => *to < *head,
            Self::RolledBack(_) => true,
            Self::Locked | Self::UpToDate { .. } => false,
        }
    }
}

/// State owned by the critical section.
#[derive(Debug, Default)]
struct TickState {
    phase: TickPhase,
    detector: ReorgDetector,
}

/// Drives the cursor forward against a [`ChainClient`].
#[derive(Debug)]
pub struct Indexer<C> {
    client: C,
    repo: Repository,
    watches: WatchRegistry,
    receivers: ReceiverRegistry,
    settings: IndexerSettings,
    critical: Mutex<TickState>,
}

impl<C: ChainClient> Indexer<C> {
    /// Indexer over `client`, persisting through `repo`.
    #[must_use]
    pub fn new(
        client: C,
        repo: Repository,
        watches: WatchRegistry,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            client,
            repo,
            watches,
            receivers: ReceiverRegistry::new(),
            settings,
            critical: Mutex::new(TickState::default()),
        }
    }

    /// The node client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// The repository ticks write through.
    #[must_use]
    pub const fn repository(&self) -> &Repository {
        &self.repo
    }

    /// The configured watch entries.
    #[must_use]
    pub const fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    /// The loop settings.
    #[must_use]
    pub const fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    /// Reorgs detected since start.
    pub async fn reorg_count(&self) -> u64 {
        self.critical.lock().await.detector.reorg_count()
    }

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the tick after recording the first block
    /// of the failed range. [`IndexerError::is_fatal`] errors need an operator.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> IndexerResult<TickOutcome> {
        let mut state = self.critical.lock().await;
        let cursor = self.repo.ensure_cursor(self.settings.start_block).await?;
        if cursor.locked {
            info!("Cursor locked, skipping tick");
            return Ok(TickOutcome::Locked);
        }

        state.phase.transition(TickPhase::Fetching)?;
        match self.advance(&mut state, cursor).await {
            Ok(outcome) => {
                state.phase.transition(TickPhase::Idle)?;
                Ok(outcome)
            }
            Err(e) => {
                let failed_from = cursor.last_processed_block + 1;
                error!(block = failed_from, phase = %state.phase, error = %e, "Tick failed");
                state.phase.transition(TickPhase::Error)?;
                if let Err(record_err) = self.repo.record_error_block(failed_from).await {
                    warn!(error = %record_err, "Failed to record error block");
                }
                state.phase.transition(TickPhase::Idle)?;
                Err(e)
            }
        }
    }

    async fn advance(&self, state: &mut TickState, cursor: Cursor) -> IndexerResult<TickOutcome> {
        let history = self.repo.block_records().await?;
        if let Some(fork_point) = state.detector.detect_reorg(&self.client, &history).await? {
            let summary = rollback_to(&self.repo, &self.receivers, fork_point).await?;
            return Ok(TickOutcome::RolledBack(summary));
        }

        let head = self.client.latest_block().await?;
        let Some(range) = cursor.pending_range(head, self.settings.max_blocks_per_tick) else {
            debug!(head, %cursor, "Up to date");
            return Ok(TickOutcome::UpToDate { head });
        };
        let (from, to) = (*range.start(), *range.end());

        let blocks = Fetcher::new(&self.client, self.settings.max_workers)
            .fetch_range(range)
            .await?;
        verify_linkage(history.last(), &blocks)?;

        state.phase.transition(TickPhase::Applying)?;
        let stats = self.apply(&blocks, to).await?;
        info!(
            from,
            to,
            head,
            applied = stats.applied,
            dropped = stats.dropped,
            decode_errors = stats.decode_errors,
            "Blocks indexed"
        );
        Ok(TickOutcome::Applied { from, to, head, stats })
    }

    async fn apply(&self, blocks: &[FetchedBlock], to: u64) -> IndexerResult<DispatchStats> {
        let dispatcher = Dispatcher::new(&self.watches, &self.receivers);
        let mut tx = self.repo.begin().await?;
        let mut stats = DispatchStats::default();

        for block in blocks {
            stats.merge(dispatcher.dispatch_block(&mut tx, block).await?);
            insert_block_record(&mut tx, &block.record()).await?;
        }
        prune_block_records(&mut tx, to, self.settings.reorg_window).await?;
        prune_applied_events(&mut tx, to, self.settings.reorg_window).await?;
        set_cursor(&mut tx, to).await?;
        commit(tx).await?;
        Ok(stats)
    }

    /// Undo everything above `fork_point` inside the critical section.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::CursorLocked`] while the maintenance lock is
    /// held, [`IndexerError::ReorgBeyondWindow`] when `fork_point` lies below
    /// the pruned part of the ledger, or the rollback error.
    pub async fn rollback(&self, fork_point: u64) -> IndexerResult<RollbackSummary> {
        let _state = self.critical.lock().await;
        let cursor = self.repo.ensure_cursor(self.settings.start_block).await?;
        if cursor.locked {
            return Err(IndexerError::CursorLocked);
        }
        let history = self.repo.block_records().await?;
        if let Some(oldest) = history.first().map(|record| record.number) {
            // Blocks between the start and the oldest record have been pruned
            if fork_point + 1 < oldest && oldest > self.settings.start_block + 1 {
                return Err(IndexerError::ReorgBeyondWindow { oldest });
            }
        }
        rollback_to(&self.repo, &self.receivers, fork_point).await
    }

    /// Tick until `shutdown` resolves or a fatal error occurs.
    ///
    /// Ticks follow each other immediately while catching up, then every
    /// `poll_interval`. Failed ticks are retried with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub async fn run<F>(&self, shutdown: F) -> IndexerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut failures: u32 = 0;
        info!(
            poll_interval = ?self.settings.poll_interval,
            max_blocks_per_tick = self.settings.max_blocks_per_tick,
            "Indexer started"
        );

        loop {
            let delay = match self.tick().await {
                Ok(outcome) => {
                    failures = 0;
                    if outcome.is_catching_up() {
                        Duration::ZERO
                    } else {
                        self.settings.poll_interval
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal error, stopping indexer");
                    return Err(e);
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = backoff_delay(
                        self.settings.retry_initial_delay,
                        self.settings.retry_max_delay,
                        failures,
                        rand::random::<f64>(),
                    );
                    warn!(attempt = failures, ?delay, error = %e, "Tick failed, retrying");
                    delay
                }
            };

            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Retry delay for the `attempt`-th consecutive failure.
///
/// Doubles from `initial` up to `max`, then applies ±25 % jitter picked by
/// `unit` in `[0, 1]`.
#[must_use]
pub fn backoff_delay(initial: Duration, max: Duration, attempt: u32, unit: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let base = initial.saturating_mul(1_u32 << exponent).min(max);
    base.mul_f64(0.5_f64.mul_add(unit.clamp(0.0, 1.0), 0.75))
}
