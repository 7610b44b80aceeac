//! Database models that map to SQL tables.
//!
//! These structures represent rows in the database and provide
//! conversions from chain and decoded-event types to their stored form.
//! Addresses and hashes are stored as lowercase `0x` hex, token amounts as
//! decimal strings so values up to 2^256 survive without loss.

use alloy::primitives::{Address, B256};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{IndexerError, IndexerResult};

/// Stored form of an address.
#[must_use]
pub fn address_key(address: &Address) -> String {
    format!("{address:?}")
}

/// Stored form of a 32-byte hash.
#[must_use]
pub fn hash_key(hash: &B256) -> String {
    format!("{hash:?}")
}

/// Parse a stored address.
///
/// # Errors
///
/// Returns a database error if the column does not hold a valid address.
pub fn parse_address(raw: &str) -> IndexerResult<Address> {
    Address::from_str(raw).map_err(|e| {
        IndexerError::database(format!("Invalid stored address: {raw}"), Some(Box::new(e)))
    })
}

/// Parse a stored decimal amount.
///
/// # Errors
///
/// Returns a database error if the column does not hold a decimal integer.
pub fn parse_amount(raw: &str) -> IndexerResult<BigInt> {
    BigInt::from_str(raw).map_err(|e| {
        IndexerError::database(format!("Invalid stored amount: {raw}"), Some(Box::new(e)))
    })
}

/// Block numbers and timestamps as SQLite integers.
#[must_use]
pub fn sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// SQLite integers back to block numbers and timestamps.
#[must_use]
pub fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

/// A centralized oracle created by the oracle factory.
///
/// Maps to the `centralized_oracles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CentralizedOracleRecord {
    /// Oracle contract address
    pub address: String,
    /// Factory that emitted the creation event
    pub factory: String,
    /// Account that created the oracle
    pub creator: String,
    /// Current owner
    pub owner: String,
    /// Owner before the last `OwnerReplacement`
    pub old_owner: Option<String>,
    /// Hex-encoded IPFS hash of the event description
    pub ipfs_hash: String,
    /// Whether the outcome has been assigned
    pub is_outcome_set: bool,
    /// Assigned outcome
    pub outcome: Option<String>,
    /// Block of the creation event
    pub creation_block: i64,
    /// Timestamp of the creation block
    pub creation_timestamp: i64,
}

/// A categorical or scalar event contract.
///
/// Maps to the `event_contracts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventContractRecord {
    /// Event contract address
    pub address: String,
    /// Factory that emitted the creation event
    pub factory: String,
    /// Account that created the event
    pub creator: String,
    /// `categorical` or `scalar`
    pub kind: String,
    /// ERC-20 collateral token
    pub collateral_token: String,
    /// Oracle resolving the event
    pub oracle: String,
    /// Number of outcomes (2 for scalar events)
    pub outcome_count: i64,
    /// Scalar lower bound
    pub lower_bound: Option<String>,
    /// Scalar upper bound
    pub upper_bound: Option<String>,
    /// Whether the winning outcome has been assigned
    pub is_winning_outcome_set: bool,
    /// Winning outcome
    pub outcome: Option<String>,
    /// Total winnings redeemed so far
    pub redeemed_winnings: String,
    /// Block of the creation event
    pub creation_block: i64,
    /// Timestamp of the creation block
    pub creation_timestamp: i64,
}

/// An outcome token of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutcomeTokenRecord {
    /// Token contract address
    pub address: String,
    /// Owning event contract
    pub event: String,
    /// Outcome this token represents
    pub outcome_index: i64,
    /// Issued minus revoked amount
    pub total_supply: String,
    /// Block of the creation event
    pub creation_block: i64,
    /// Timestamp of the creation block
    pub creation_timestamp: i64,
}

/// Balance of one owner for one outcome token. Zero balances are not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutcomeTokenBalanceRecord {
    /// Token contract address
    pub outcome_token: String,
    /// Holder
    pub owner: String,
    /// Decimal balance
    pub balance: String,
}

/// Market lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStage {
    /// Created, not yet funded
    Created = 0,
    /// Funded and trading
    Funded = 1,
    /// Closed by its creator
    Closed = 2,
}

impl MarketStage {
    /// Stored integer value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }
}

/// A standard LMSR market.
///
/// Maps to the `markets` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MarketRecord {
    /// Market contract address
    pub address: String,
    /// Factory that emitted the creation event
    pub factory: String,
    /// Account that created the market
    pub creator: String,
    /// Event contract traded by this market
    pub event: String,
    /// Market maker contract
    pub market_maker: String,
    /// Fee in parts per million
    pub fee: i64,
    /// Funding, absent until `MarketFunding`
    pub funding: Option<String>,
    /// JSON array of decimal net sold amounts, one per outcome
    pub net_outcome_tokens_sold: String,
    /// See [`MarketStage`]
    pub stage: i64,
    /// Fees collected from trades
    pub collected_fees: String,
    /// Fees withdrawn by the creator
    pub withdrawn_fees: String,
    /// Sum of trade costs and profits
    pub trading_volume: String,
    /// Block of the creation event
    pub creation_block: i64,
    /// Timestamp of the creation block
    pub creation_timestamp: i64,
}

impl MarketRecord {
    /// Parsed net outcome tokens sold vector.
    ///
    /// # Errors
    ///
    /// Returns a database error if the stored JSON is malformed.
    pub fn net_sold(&self) -> IndexerResult<Vec<BigInt>> {
        decode_amounts(&self.net_outcome_tokens_sold)
    }

    /// Parsed funding.
    ///
    /// # Errors
    ///
    /// Returns a database error if the stored amount is malformed.
    pub fn funding_amount(&self) -> IndexerResult<Option<BigInt>> {
        self.funding.as_deref().map(parse_amount).transpose()
    }
}

/// Encode an amount vector as a JSON array of decimal strings.
#[must_use]
pub fn encode_amounts(amounts: &[BigInt]) -> String {
    let strings: Vec<String> = amounts.iter().map(ToString::to_string).collect();
    serde_json::to_string(&strings).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a JSON array of decimal strings.
///
/// # Errors
///
/// Returns a database error on malformed JSON or amounts.
pub fn decode_amounts(raw: &str) -> IndexerResult<Vec<BigInt>> {
    let strings: Vec<String> = serde_json::from_str(raw).map_err(|e| {
        IndexerError::database(format!("Invalid stored amount list: {raw}"), Some(Box::new(e)))
    })?;
    strings.iter().map(|s| parse_amount(s)).collect()
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// `OutcomeTokenPurchase`
    Buy,
    /// `OutcomeTokenSale`
    Sell,
    /// `OutcomeTokenShortSale`
    ShortSell,
}

impl OrderType {
    /// Stored discriminator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::ShortSell => "SHORT_SELL",
        }
    }
}

/// A trade on a market. Created once per trade event, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderRecord {
    /// Database-assigned identifier
    pub id: i64,
    /// Market traded on
    pub market: String,
    /// Buyer or seller
    pub sender: String,
    /// `BUY`, `SELL` or `SHORT_SELL`
    pub order_type: String,
    /// Outcome index the order refers to
    pub outcome_token_index: i64,
    /// Number of outcome tokens
    pub outcome_token_count: String,
    /// Cost including fees (buy, short sell)
    pub cost: Option<String>,
    /// Profit net of fees (sell)
    pub profit: Option<String>,
    /// Market fees paid
    pub fees: String,
    /// JSON array of marginal prices after the trade, 4 decimals each
    pub marginal_prices: String,
    /// Emitting transaction
    pub transaction_hash: String,
    /// Position of the log in its block
    pub log_index: i64,
    /// Block of the trade
    pub creation_block: i64,
    /// Timestamp of the trade block
    pub creation_timestamp: i64,
}

impl OrderRecord {
    /// Parsed marginal price snapshot.
    #[must_use]
    pub fn prices(&self) -> Vec<String> {
        serde_json::from_str(&self.marginal_prices).unwrap_or_default()
    }
}

/// A tournament participant registered through the address registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TournamentParticipantRecord {
    /// Tournament address
    pub address: String,
    /// Registered mainnet address
    pub mainnet_address: String,
    /// Tournament token balance
    pub balance: String,
    /// Block of the registration
    pub creation_block: i64,
    /// Timestamp of the registration block
    pub creation_timestamp: i64,
}

/// The singleton cursor row.
///
/// Maps to the `indexer_cursor` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CursorRecord {
    /// Last block fully applied
    pub last_processed_block: i64,
    /// First block of the last failed tick
    pub last_error_block: Option<i64>,
    /// Maintenance lock
    pub locked: bool,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

/// A stored block hash used for reorg detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockRecordRow {
    /// Block number
    pub number: i64,
    /// Block hash
    pub hash: String,
    /// Parent block hash
    pub parent_hash: String,
    /// Block timestamp
    pub timestamp: i64,
}

/// One entry of the applied-event ledger, in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AppliedEventRecord {
    /// Monotonic application order
    pub id: i64,
    /// Contract role the event was routed to
    pub role: String,
    /// Event name
    pub event_name: String,
    /// Emitting contract
    pub address: String,
    /// Serialised `DecodedEvent`
    pub event_json: String,
    /// Table of the affected entity
    pub entity: String,
    /// Rendered identity of the affected entity
    pub entity_key: String,
    /// Block number
    pub block_number: i64,
    /// Block hash at application time
    pub block_hash: String,
    /// Block timestamp
    pub block_timestamp: i64,
    /// Unix timestamp of the application
    pub applied_at: i64,
}
