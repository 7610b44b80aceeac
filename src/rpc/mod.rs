//! Node RPC collaborator.
//!
//! The indexer only needs three node calls: the chain head
//! (`eth_blockNumber`), a block with its transaction hashes
//! (`eth_getBlockByNumber`) and the logs of a transaction receipt
//! (`eth_getTransactionReceipt`). They are expressed as the [`ChainClient`]
//! trait so the fetch loop and reorg detection run unchanged against the
//! HTTP provider in [`http`] or an in-memory chain in tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pm_event_indexer::rpc::{create_provider, ChainClient, HttpChainClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = create_provider("https://eth-mainnet.g.alchemy.com/v2/KEY").await?;
//! let client = HttpChainClient::new(provider);
//! let head = client.latest_block().await?;
//! let block = client.block(head).await?;
//! # Ok(())
//! # }
//! ```

pub mod http;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::abi::RawLog;
use crate::error::IndexerResult;

pub use http::{check_connection, create_provider, get_latest_block, HttpChainClient, Provider};

/// Block header fields and transaction hashes, as needed by the fetch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: B256,
    /// Parent block hash
    pub parent_hash: B256,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    /// Transaction hashes in block order
    pub transactions: Vec<B256>,
}

/// Read-only access to an Ethereum-compatible node.
pub trait ChainClient: Send + Sync {
    /// Current chain head height.
    fn latest_block(&self) -> impl Future<Output = IndexerResult<u64>> + Send;

    /// Block by number; `None` when the node has no such block or the block
    /// carries no hash.
    fn block(
        &self,
        number: u64,
    ) -> impl Future<Output = IndexerResult<Option<BlockSummary>>> + Send;

    /// Logs of a transaction receipt, in log order; `None` when the node has
    /// no receipt for the transaction.
    fn receipt_logs(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = IndexerResult<Option<Vec<RawLog>>>> + Send;
}
