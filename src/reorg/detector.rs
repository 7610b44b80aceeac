//! Reorg detection implementation.

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::db::models::{from_sql_int, BlockRecordRow};
use crate::error::{IndexerError, IndexerResult};
use crate::rpc::{BlockSummary, ChainClient};

/// Record of an applied block for reorg detection.
///
/// Stores minimal information needed to verify chain continuity:
/// - Block number and hash
/// - Parent hash (to verify chain linkage)
/// - Timestamp (for debugging and metrics)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block number
    pub number: u64,

    /// Block hash
    pub hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
}

impl BlockRecord {
    /// Create a new `BlockRecord` manually (useful for testing).
    #[must_use]
    pub const fn new(number: u64, hash: B256, parent_hash: B256, timestamp: u64) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            timestamp,
        }
    }

    /// Header fields of a fetched block.
    #[must_use]
    pub const fn from_summary(block: &BlockSummary) -> Self {
        Self::new(block.number, block.hash, block.parent_hash, block.timestamp)
    }
}

impl TryFrom<BlockRecordRow> for BlockRecord {
    type Error = IndexerError;

    fn try_from(row: BlockRecordRow) -> IndexerResult<Self> {
        let parse = |raw: &str| {
            B256::from_str(raw).map_err(|e| {
                let message = format!("Invalid stored block hash: {raw}");
                IndexerError::database(message, Some(Box::new(e)))
            })
        };
        Ok(Self {
            number: from_sql_int(row.number),
            hash: parse(&row.hash)?,
            parent_hash: parse(&row.parent_hash)?,
            timestamp: from_sql_int(row.timestamp),
        })
    }
}

/// Chain reorganization detector.
///
/// Compares the block hashes recorded when blocks were applied with the hashes
/// the node currently reports. When the newest recorded block is no longer
/// canonical, a binary search over the recorded window finds the last common
/// ancestor.
///
/// ## Algorithm
///
/// 1. Fetch the node's block at the newest recorded height
/// 2. If its hash matches, there is no reorg
/// 3. Otherwise binary search the recorded window for the highest block whose
///    hash still matches; that block is the fork point
/// 4. If even the oldest recorded block no longer matches, the reorg is deeper
///    than the window and cannot be undone automatically
///
/// ## Example
///
/// ```rust,ignore
/// use pm_event_indexer::reorg::ReorgDetector;
///
/// # use pm_event_indexer::{db::repository::Repository, error::IndexerResult, rpc::ChainClient};
/// # async fn example(client: &impl ChainClient, repo: &Repository) -> IndexerResult<()> {
/// let mut detector = ReorgDetector::new();
/// let history = repo.block_records().await?;
/// if let Some(fork_point) = detector.detect_reorg(client, &history).await? {
///     println!("Reorg detected! Rolling back to block {fork_point}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorgDetector {
    /// Total number of reorgs detected
    reorg_count: u64,
}

impl ReorgDetector {
    /// Create a new reorg detector.
    #[must_use]
    pub const fn new() -> Self {
        Self { reorg_count: 0 }
    }

    /// Get the total number of detected reorgs.
    #[must_use]
    pub const fn reorg_count(&self) -> u64 {
        self.reorg_count
    }

    /// Detect whether the recorded history is still canonical.
    ///
    /// `history` must be sorted by ascending block number. Returns
    /// `Ok(Some(fork_point))` with the last common ancestor when a reorg is
    /// detected, `Ok(None)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if the node cannot be queried, or
    /// [`IndexerError::ReorgBeyondWindow`] if no recorded block is canonical.
    pub async fn detect_reorg<C: ChainClient>(
        &mut self,
        client: &C,
        history: &[BlockRecord],
    ) -> IndexerResult<Option<u64>> {
        let Some(last_known) = history.last() else {
            debug!("No block history recorded, cannot detect reorg");
            return Ok(None);
        };

        if is_canonical(client, last_known).await? {
            return Ok(None);
        }

        warn!(
            block = last_known.number,
            expected = %last_known.hash,
            "REORG DETECTED, recorded block hash is no longer canonical"
        );
        self.reorg_count += 1;

        let fork_point = find_fork_point(client, history).await?;
        info!(
            fork_point,
            depth = last_known.number - fork_point,
            "Fork point found"
        );

        Ok(Some(fork_point))
    }
}

/// Binary search for the highest recorded block that is still canonical.
///
/// Invariant: `history[low]` matches the chain and `history[high]` does not.
async fn find_fork_point<C: ChainClient>(
    client: &C,
    history: &[BlockRecord],
) -> IndexerResult<u64> {
    let oldest = &history[0];
    if !is_canonical(client, oldest).await? {
        return Err(IndexerError::ReorgBeyondWindow {
            oldest: oldest.number,
        });
    }

    let mut low = 0;
    let mut high = history.len() - 1;
    debug!(from = oldest.number, to = history[high].number, "Binary search for fork point");

    while high - low > 1 {
        let mid = low + (high - low) / 2;
        if is_canonical(client, &history[mid]).await? {
            low = mid;
        } else {
            high = mid;
        }
    }

    Ok(history[low].number)
}

/// Whether the node still has the recorded hash at the recorded height.
async fn is_canonical<C: ChainClient>(client: &C, record: &BlockRecord) -> IndexerResult<bool> {
    let on_chain = client.block(record.number).await?;
    Ok(on_chain.is_some_and(|block| block.hash == record.hash))
}
