//! Block and receipt fetching.
//!
//! Blocks of a range and the receipts inside each block are requested
//! concurrently, but every RPC call first takes a permit from one semaphore so
//! at most `max_workers` requests are in flight. `buffered` keeps results in
//! request order: blocks come back ascending, logs in transaction order.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::ops::RangeInclusive;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::abi::{BlockInfo, RawLog};
use crate::error::{IndexerError, IndexerResult};
use crate::reorg::BlockRecord;
use crate::rpc::{BlockSummary, ChainClient};

/// A block with the logs of all its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlock {
    /// Header fields and transaction hashes
    pub block: BlockSummary,
    /// Logs in transaction order, then log order
    pub logs: Vec<RawLog>,
}

impl FetchedBlock {
    /// Block context handed to receivers.
    #[must_use]
    pub const fn info(&self) -> BlockInfo {
        BlockInfo::new(self.block.number, self.block.timestamp)
    }

    /// Hash record stored for reorg detection.
    #[must_use]
    pub const fn record(&self) -> BlockRecord {
        BlockRecord::from_summary(&self.block)
    }
}

/// Bounded-parallel fetcher over a [`ChainClient`].
#[derive(Debug)]
pub struct Fetcher<'a, C> {
    client: &'a C,
    max_workers: usize,
    permits: Semaphore,
}

impl<'a, C: ChainClient> Fetcher<'a, C> {
    /// Fetcher allowing `max_workers` concurrent requests (at least one).
    #[must_use]
    pub fn new(client: &'a C, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            client,
            max_workers,
            permits: Semaphore::new(max_workers),
        }
    }

    /// Fetch every block of `range` with its logs, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::UnknownBlock`] if the node has no block (or no
    /// hash) for a height, or an RPC error if a request fails or a listed
    /// transaction has no receipt. Nothing is returned for a partially fetched
    /// range.
    #[instrument(skip(self), fields(blocks = range.end().saturating_sub(*range.start()) + 1))]
    pub async fn fetch_range(
        &self,
        range: RangeInclusive<u64>,
    ) -> IndexerResult<Vec<FetchedBlock>> {
        let blocks: Vec<FetchedBlock> = stream::iter(range)
            .map(|number| self.fetch_block(number))
            .buffered(self.max_workers)
            .try_collect()
            .await?;

        let logs: usize = blocks.iter().map(|block| block.logs.len()).sum();
        debug!(blocks = blocks.len(), logs, "Range fetched");
        Ok(blocks)
    }

    /// Fetch one block and the logs of its receipts.
    ///
    /// # Errors
    ///
    /// Same as [`Fetcher::fetch_range`].
    pub async fn fetch_block(&self, number: u64) -> IndexerResult<FetchedBlock> {
        let block = {
            let _permit = self.permit().await?;
            self.client.block(number).await?
        }
        .ok_or(IndexerError::UnknownBlock { number })?;

        let receipts: Vec<Vec<RawLog>> = stream::iter(block.transactions.iter().copied())
            .map(|tx_hash| async move {
                let _permit = self.permit().await?;
                self.client.receipt_logs(tx_hash).await?.ok_or_else(|| {
                    IndexerError::rpc(
                        format!("Node has no receipt for transaction {tx_hash} of block {number}"),
                        None,
                    )
                })
            })
            .buffered(self.max_workers)
            .try_collect()
            .await?;

        Ok(FetchedBlock {
            block,
            logs: receipts.into_iter().flatten().collect(),
        })
    }

    async fn permit(&self) -> IndexerResult<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|e| IndexerError::state("RPC worker pool closed", Some(Box::new(e))))
    }
}

/// Check that `blocks` form one chain on top of `tip`.
///
/// # Errors
///
/// Returns a state error naming the first block whose parent hash does not
/// match its predecessor. The next tick's reorg check resolves the divergence.
pub fn verify_linkage(tip: Option<&BlockRecord>, blocks: &[FetchedBlock]) -> IndexerResult<()> {
    let mut previous = tip.map(|record| (record.number, record.hash));
    for fetched in blocks {
        let block = &fetched.block;
        if let Some((number, hash)) = previous {
            if number + 1 == block.number && block.parent_hash != hash {
                return Err(IndexerError::state(
                    format!(
                        "Block {} does not extend block {number}: parent {} != {hash}",
                        block.number, block.parent_hash
                    ),
                    None,
                ));
            }
        }
        previous = Some((block.number, block.hash));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, B256};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Two transactions per block, one log per transaction; tracks concurrency.
    struct CountingChain {
        head: u64,
        missing: Option<u64>,
        missing_receipt: Option<B256>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingChain {
        fn new(head: u64) -> Self {
            Self {
                head,
                missing: None,
                missing_receipt: None,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        async fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn tx_hash(block: u64, index: u64) -> B256 {
        B256::left_padding_from(&(block * 100 + index).to_be_bytes())
    }

    impl ChainClient for CountingChain {
        async fn latest_block(&self) -> IndexerResult<u64> {
            Ok(self.head)
        }

        async fn block(&self, number: u64) -> IndexerResult<Option<BlockSummary>> {
            self.enter().await;
            if number > self.head || self.missing == Some(number) {
                return Ok(None);
            }
            Ok(Some(BlockSummary {
                number,
                hash: B256::left_padding_from(&number.to_be_bytes()),
                parent_hash: B256::left_padding_from(&number.saturating_sub(1).to_be_bytes()),
                timestamp: 1_000 + number,
                transactions: vec![tx_hash(number, 0), tx_hash(number, 1)],
            }))
        }

        async fn receipt_logs(&self, tx: B256) -> IndexerResult<Option<Vec<RawLog>>> {
            self.enter().await;
            if self.missing_receipt == Some(tx) {
                return Ok(None);
            }
            Ok(Some(vec![RawLog {
                address: Address::ZERO,
                topics: Vec::new(),
                data: Bytes::new(),
                transaction_hash: tx,
                log_index: 0,
            }]))
        }
    }

    #[tokio::test]
    async fn test_range_is_ordered() {
        let chain = CountingChain::new(20);
        let fetcher = Fetcher::new(&chain, 4);
        let blocks = fetcher.fetch_range(5..=12).await.unwrap();

        let numbers: Vec<u64> = blocks.iter().map(|b| b.block.number).collect();
        assert_eq!(numbers, (5..=12).collect::<Vec<_>>());
        for block in &blocks {
            let txs: Vec<B256> = block.logs.iter().map(|log| log.transaction_hash).collect();
            assert_eq!(txs, vec![tx_hash(block.block.number, 0), tx_hash(block.block.number, 1)]);
        }
        assert!(chain.peak.load(Ordering::SeqCst) <= 4);
        verify_linkage(None, &blocks).unwrap();
    }

    #[tokio::test]
    async fn test_missing_block_aborts_range() {
        let mut chain = CountingChain::new(20);
        chain.missing = Some(7);
        let fetcher = Fetcher::new(&chain, 2);
        let err = fetcher.fetch_range(5..=9).await.unwrap_err();
        assert!(matches!(err, IndexerError::UnknownBlock { number: 7 }));
    }

    #[tokio::test]
    async fn test_missing_receipt_aborts_range() {
        let mut chain = CountingChain::new(20);
        chain.missing_receipt = Some(tx_hash(6, 1));
        let fetcher = Fetcher::new(&chain, 2);
        let err = fetcher.fetch_range(5..=7).await.unwrap_err();
        assert!(matches!(err, IndexerError::RpcError { .. }), "got {err:?}");
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_linkage_against_stored_tip() {
        let chain = CountingChain::new(10);
        let fetcher = Fetcher::new(&chain, 2);
        let blocks = fetcher.fetch_range(4..=5).await.unwrap();

        let good_tip =
            BlockRecord::new(3, B256::left_padding_from(&3u64.to_be_bytes()), B256::ZERO, 0);
        verify_linkage(Some(&good_tip), &blocks).unwrap();

        let stale_tip = BlockRecord::new(3, B256::repeat_byte(0xab), B256::ZERO, 0);
        assert!(verify_linkage(Some(&stale_tip), &blocks).is_err());

        let mut broken = blocks;
        broken[1].block.parent_hash = B256::repeat_byte(1);
        assert!(verify_linkage(None, &broken).is_err());
    }
}
