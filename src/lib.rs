//! # Prediction-Market Event Indexer
//!
//! Follows the events of a family of prediction-market contracts (oracles,
//! event contracts, outcome tokens, automated market makers, a tournament
//! token) on an Ethereum-compatible chain, applies them to a SQLite store and
//! undoes them when the chain reorganizes.
//!
//! ## Architecture
//!
//! 1. **ABI** ([`abi`]) - runtime-registered contract interfaces, log decoding
//! 2. **Watch** ([`watch`]) - which contracts to follow, static or derived from
//!    indexed entities
//! 3. **Fetch** ([`fetcher`], [`rpc`]) - bounded-parallel block and receipt
//!    retrieval through the [`rpc::ChainClient`] seam
//! 4. **Dispatch** ([`dispatch`], [`receivers`]) - route decoded events to the
//!    handler of the emitting contract's role and ledger what they changed
//! 5. **Reorg** ([`reorg`], [`rollback`]) - detect forks against recorded block
//!    hashes and undo ledgered events newest first
//! 6. **Pricing** ([`pricing`]) - LMSR marginal prices and trade costs at
//!    100-digit precision
//! 7. **Loop** ([`indexer`], [`cursor`]) - the tick state machine and retry
//!
//! ## Quick Start
//!
//! ```bash
//! cp config/watch.example.json watch.json
//! RPC_URL=http://localhost:8545 cargo run --release -- run
//! ```
//!
//! ## Using as a Library
//!
//! ```rust,no_run
//! use pm_event_indexer::{
//!     config::Config, db::{create_pool, repository::Repository}, indexer::Indexer,
//!     rpc::{create_provider, HttpChainClient}, watch::WatchRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let repo = Repository::new(create_pool(config.database_url()).await?);
//!     let watches = WatchRegistry::from_file(config.watch_config())?;
//!     let client = HttpChainClient::new(create_provider(config.rpc_url()).await?);
//!
//!     let indexer = Indexer::new(client, repo, watches, config.indexer_settings());
//!     let outcome = indexer.tick().await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::IndexerResult<T>`](error::IndexerResult):
//!
//! ```rust
//! use pm_event_indexer::error::{IndexerError, IndexerResult};
//!
//! fn example() -> IndexerResult<()> {
//!     Err(IndexerError::validation("funding must be positive"))
//! }
//! assert!(example().unwrap_err().is_validation());
//! ```
//!
//! ## Testing
//!
//! ```bash
//! # All tests
//! cargo test
//!
//! # Integration tests
//! cargo test --test '*'
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod abi;
pub mod cli;
pub mod config;
pub mod cursor;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod fetcher;
pub mod indexer;
pub mod observability;
pub mod pricing;
pub mod receivers;
pub mod reorg;
pub mod rollback;
pub mod rpc;
pub mod watch;
