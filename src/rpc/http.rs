//! HTTP node provider.
//!
//! This module handles the connection to an Ethereum node over HTTP and
//! implements [`ChainClient`] on top of Alloy's `RootProvider`.
//!
//! ## Example
//!
//! ```no_run
//! use pm_event_indexer::rpc::{create_provider, get_latest_block};
//! use pm_event_indexer::error::IndexerResult;
//!
//! # async fn example() -> IndexerResult<()> {
//! let provider = create_provider("https://eth-mainnet.g.alchemy.com/v2/API_KEY").await?;
//! let latest_block = get_latest_block(&provider).await?;
//! println!("Latest block: {}", latest_block);
//! # Ok(())
//! # }
//! ```

use alloy::primitives::B256;
use alloy::providers::{Provider as AlloyProvider, ProviderBuilder, RootProvider};
use alloy::rpc::types::BlockTransactionsKind;
use alloy::transports::http::{Client, Http};
use std::future::Future;
use tracing::{debug, info, instrument, warn};

use super::{BlockSummary, ChainClient};
use crate::abi::RawLog;
use crate::error::{IndexerError, IndexerResult};

/// HTTP transport provider.
pub type Provider = RootProvider<Http<Client>>;

/// Create a new Ethereum RPC provider connected via HTTP.
///
/// # Errors
///
/// Returns an RPC error if the URL cannot be parsed.
///
/// # Example
///
/// ```no_run
/// use pm_event_indexer::rpc::create_provider;
/// use pm_event_indexer::error::IndexerResult;
///
/// # async fn example() -> IndexerResult<()> {
/// let provider = create_provider("https://eth-mainnet.g.alchemy.com/v2/YOUR_KEY").await?;
/// # Ok(())
/// # }
/// ```
#[allow(clippy::unused_async)]
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub async fn create_provider(rpc_url: &str) -> IndexerResult<Provider> {
    info!("Initializing RPC provider");

    // Log the host only, the path may carry an API key
    let host = rpc_url.split("/v2/").next().unwrap_or("unknown");
    tracing::Span::current().record("rpc_host", host);

    let url = rpc_url.parse().map_err(|e| {
        let msg = if rpc_url.starts_with("http") {
            format!("Failed to parse RPC URL: '{host}'")
        } else {
            format!(
                "Invalid RPC URL: '{host}'. Expected format: 'https://eth-mainnet.g.alchemy.com/v2/YOUR_KEY'"
            )
        };
        IndexerError::rpc(msg, Some(Box::new(e)))
    })?;

    let provider = ProviderBuilder::new().on_http(url);

    info!("RPC provider initialized successfully");

    Ok(provider)
}

/// Get the latest block number from the node.
///
/// # Errors
///
/// Returns an RPC error if the request fails.
#[instrument(
    skip(provider),
    fields(block = tracing::field::Empty, duration_ms = tracing::field::Empty)
)]
pub async fn get_latest_block(provider: &Provider) -> IndexerResult<u64> {
    debug!("Fetching latest block number");

    let start = std::time::Instant::now();
    let block_number = provider
        .get_block_number()
        .await
        .map_err(|e| IndexerError::rpc("Failed to fetch latest block number", Some(Box::new(e))))?;

    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::Span::current().record("block", block_number);
    tracing::Span::current().record("duration_ms", duration_ms);

    debug!(block = block_number, duration_ms, "Latest block fetched");

    Ok(block_number)
}

/// Check if the provider connection is healthy by fetching the latest block.
///
/// # Errors
///
/// Returns an RPC error if the node cannot be reached.
#[instrument(skip(provider))]
pub async fn check_connection(provider: &Provider) -> IndexerResult<()> {
    debug!("Checking provider connection health");

    match get_latest_block(provider).await {
        Ok(block) => {
            info!(block, "Connection check successful");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Connection check failed");
            Err(IndexerError::rpc(
                format!("Provider connection health check failed: {e}"),
                None,
            ))
        }
    }
}

/// [`ChainClient`] backed by the HTTP provider.
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    provider: Provider,
}

impl HttpChainClient {
    /// Wrap a provider.
    #[must_use]
    pub const fn new(provider: Provider) -> Self {
        Self { provider }
    }

    /// Underlying provider.
    #[must_use]
    pub const fn provider(&self) -> &Provider {
        &self.provider
    }
}

impl ChainClient for HttpChainClient {
    fn latest_block(&self) -> impl Future<Output = IndexerResult<u64>> + Send {
        get_latest_block(&self.provider)
    }

    fn block(
        &self,
        number: u64,
    ) -> impl Future<Output = IndexerResult<Option<BlockSummary>>> + Send {
        async move {
            let block = self
                .provider
                .get_block_by_number(number.into(), BlockTransactionsKind::Hashes)
                .await
                .map_err(|e| {
                    IndexerError::rpc(format!("Failed to fetch block {number}"), Some(Box::new(e)))
                })?;

            Ok(block
                .filter(|block| block.header.hash != B256::ZERO)
                .map(|block| BlockSummary {
                    number: block.header.number,
                    hash: block.header.hash,
                    parent_hash: block.header.parent_hash,
                    timestamp: block.header.timestamp,
                    transactions: block.transactions.hashes().map(|hash| hash.to_owned()).collect(),
                }))
        }
    }

    fn receipt_logs(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = IndexerResult<Option<Vec<RawLog>>>> + Send {
        async move {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| {
                    IndexerError::rpc(
                        format!("Failed to fetch receipt {tx_hash}"),
                        Some(Box::new(e)),
                    )
                })?;

            Ok(receipt.map(|receipt| receipt.inner.logs().iter().map(RawLog::from).collect()))
        }
    }
}
