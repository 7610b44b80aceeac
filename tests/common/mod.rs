//! Fixtures shared by the integration tests: an in-memory chain, log encoding
//! against the bundled ABIs and decoded-event builders.

#![allow(dead_code)]
#![allow(clippy::panic)]

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Address, Bytes, B256, U256};
use num_bigint::BigInt;
use sqlx::pool::PoolConnection;
use sqlx::Sqlite;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use pm_event_indexer::abi::contracts::abi_for;
use pm_event_indexer::abi::{AbiKind, DecodedEvent, RawLog, Value};
use pm_event_indexer::db::create_memory_pool;
use pm_event_indexer::error::IndexerResult;
use pm_event_indexer::rpc::{BlockSummary, ChainClient};
use pm_event_indexer::watch::ContractRole;

pub const FUNDING: u64 = 1_000_000_000_000_000_000;

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn int(value: u64) -> Value {
    Value::Int(BigInt::from(value))
}

pub fn uint(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 256)
}

/// One connection to a fresh migrated in-memory database.
pub async fn memory_conn() -> PoolConnection<Sqlite> {
    let pool = create_memory_pool().await.unwrap();
    pool.acquire().await.unwrap()
}

// ==================== DECODED EVENTS ====================

pub fn oracle_creation(factory: Address, oracle: Address, creator: Address) -> DecodedEvent {
    DecodedEvent::new(
        factory,
        "CentralizedOracleCreation",
        [
            ("creator", Value::Address(creator)),
            ("centralizedOracle", Value::Address(oracle)),
            ("ipfsHash", Value::Bytes(Bytes::from_static(b"QmHash"))),
        ],
    )
}

pub fn categorical_event_creation(
    factory: Address,
    event: Address,
    oracle: Address,
    outcomes: u64,
) -> DecodedEvent {
    DecodedEvent::new(
        factory,
        "CategoricalEventCreation",
        [
            ("creator", Value::Address(addr(0xc1))),
            ("collateralToken", Value::Address(addr(0xc2))),
            ("oracle", Value::Address(oracle)),
            ("outcomeCount", int(outcomes)),
            ("categoricalEvent", Value::Address(event)),
        ],
    )
}

pub fn market_creation(factory: Address, market: Address, event: Address) -> DecodedEvent {
    DecodedEvent::new(
        factory,
        "StandardMarketCreation",
        [
            ("creator", Value::Address(addr(0xc1))),
            ("market", Value::Address(market)),
            ("eventContract", Value::Address(event)),
            ("marketMaker", Value::Address(addr(0xc3))),
            ("fee", int(0)),
        ],
    )
}

pub fn outcome_token_creation(event: Address, token: Address, index: u64) -> DecodedEvent {
    DecodedEvent::new(
        event,
        "OutcomeTokenCreation",
        [("outcomeToken", Value::Address(token)), ("index", int(index))],
    )
}

pub fn market_funding(market: Address, funding: u64) -> DecodedEvent {
    DecodedEvent::new(market, "MarketFunding", [("funding", int(funding))])
}

pub fn purchase(
    market: Address,
    buyer: Address,
    index: u64,
    count: u64,
    cost: u64,
    fees: u64,
) -> DecodedEvent {
    DecodedEvent::new(
        market,
        "OutcomeTokenPurchase",
        [
            ("buyer", Value::Address(buyer)),
            ("outcomeTokenIndex", int(index)),
            ("outcomeTokenCount", int(count)),
            ("outcomeTokenCost", int(cost)),
            ("marketFees", int(fees)),
        ],
    )
}

pub fn sale(
    market: Address,
    seller: Address,
    index: u64,
    count: u64,
    profit: u64,
    fees: u64,
) -> DecodedEvent {
    DecodedEvent::new(
        market,
        "OutcomeTokenSale",
        [
            ("seller", Value::Address(seller)),
            ("outcomeTokenIndex", int(index)),
            ("outcomeTokenCount", int(count)),
            ("outcomeTokenProfit", int(profit)),
            ("marketFees", int(fees)),
        ],
    )
}

pub fn issuance(token: Address, owner: Address, amount: u64) -> DecodedEvent {
    DecodedEvent::new(
        token,
        "Issuance",
        [("owner", Value::Address(owner)), ("amount", int(amount))],
    )
}

pub fn transfer(token: Address, from: Address, to: Address, value: u64) -> DecodedEvent {
    DecodedEvent::new(
        token,
        "Transfer",
        [
            ("from", Value::Address(from)),
            ("to", Value::Address(to)),
            ("value", int(value)),
        ],
    )
}

pub fn scalar_event_creation(
    factory: Address,
    event: Address,
    oracle: Address,
    lower: i64,
    upper: i64,
) -> DecodedEvent {
    DecodedEvent::new(
        factory,
        "ScalarEventCreation",
        [
            ("creator", Value::Address(addr(0xc1))),
            ("collateralToken", Value::Address(addr(0xc2))),
            ("oracle", Value::Address(oracle)),
            ("lowerBound", Value::Int(BigInt::from(lower))),
            ("upperBound", Value::Int(BigInt::from(upper))),
            ("scalarEvent", Value::Address(event)),
        ],
    )
}

pub fn owner_replacement(oracle: Address, new_owner: Address) -> DecodedEvent {
    DecodedEvent::new(oracle, "OwnerReplacement", [("newOwner", Value::Address(new_owner))])
}

/// `OutcomeAssignment` as emitted by an oracle or an event contract.
pub fn outcome_assignment(emitter: Address, outcome: i64) -> DecodedEvent {
    DecodedEvent::new(
        emitter,
        "OutcomeAssignment",
        [("outcome", Value::Int(BigInt::from(outcome)))],
    )
}

pub fn winnings_redemption(event: Address, receiver: Address, winnings: u64) -> DecodedEvent {
    DecodedEvent::new(
        event,
        "WinningsRedemption",
        [("receiver", Value::Address(receiver)), ("winnings", int(winnings))],
    )
}

pub fn revocation(token: Address, owner: Address, amount: u64) -> DecodedEvent {
    DecodedEvent::new(
        token,
        "Revocation",
        [("owner", Value::Address(owner)), ("amount", int(amount))],
    )
}

pub fn market_closing(market: Address) -> DecodedEvent {
    DecodedEvent::new(market, "MarketClosing", Vec::<(String, Value)>::new())
}

pub fn fee_withdrawal(market: Address, fees: u64) -> DecodedEvent {
    DecodedEvent::new(market, "FeeWithdrawal", [("fees", int(fees))])
}

pub fn short_sale(
    market: Address,
    buyer: Address,
    index: u64,
    count: u64,
    cost: u64,
) -> DecodedEvent {
    DecodedEvent::new(
        market,
        "OutcomeTokenShortSale",
        [
            ("buyer", Value::Address(buyer)),
            ("outcomeTokenIndex", int(index)),
            ("outcomeTokenCount", int(count)),
            ("cost", int(cost)),
        ],
    )
}

pub fn registration(registry: Address, registrant: Address) -> DecodedEvent {
    DecodedEvent::new(
        registry,
        "AddressRegistration",
        [
            ("registrant", Value::Address(registrant)),
            ("registeredMainnetAddress", Value::Address(addr(0x99))),
        ],
    )
}

// ==================== LOG ENCODING ====================

/// Encode `event` of `role` as emitted by `address`. Values are matched to the
/// ABI inputs by name.
pub fn encode_log(
    role: ContractRole,
    event: &str,
    address: Address,
    values: &[(&str, DynSolValue)],
) -> RawLog {
    let abi = abi_for(role).unwrap();
    let entry = abi
        .iter()
        .find(|entry| entry.kind == AbiKind::Event && entry.name.as_deref() == Some(event))
        .unwrap_or_else(|| panic!("{role} has no event {event}"));

    let mut topics = vec![entry.topic()];
    let mut body = Vec::new();
    for input in &entry.inputs {
        let value = values
            .iter()
            .find(|(name, _)| *name == input.name)
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| panic!("missing value for {}", input.name));
        if input.indexed {
            topics.push(B256::from_slice(&value.abi_encode()));
        } else {
            body.push(value);
        }
    }
    let data = if body.is_empty() {
        Vec::new()
    } else {
        DynSolValue::Tuple(body).abi_encode_params()
    };

    RawLog {
        address,
        topics,
        data: data.into(),
        transaction_hash: B256::ZERO,
        log_index: 0,
    }
}

// ==================== IN-MEMORY CHAIN ====================

#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, BlockSummary>,
    receipts: HashMap<B256, Vec<RawLog>>,
    branch: u8,
}

/// A chain that grows block by block and can be reorganized. Every log gets
/// its own transaction.
pub struct MemoryChain {
    state: Mutex<ChainState>,
}

fn chain_hash(number: u64, branch: u8, salt: u64, marker: u8) -> B256 {
    let mut bytes = [marker; 32];
    bytes[..8].copy_from_slice(&number.to_be_bytes());
    bytes[8] = branch;
    bytes[9..17].copy_from_slice(&salt.to_be_bytes());
    B256::from(bytes)
}

impl MemoryChain {
    /// A chain holding only block 0.
    pub fn new() -> Self {
        let chain = Self {
            state: Mutex::new(ChainState::default()),
        };
        chain.push_block(Vec::new());
        chain
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().blocks.keys().next_back().copied().unwrap_or_default()
    }

    pub fn hash_of(&self, number: u64) -> Option<B256> {
        self.state.lock().unwrap().blocks.get(&number).map(|block| block.hash)
    }

    /// Append a block carrying `logs`, returning its number.
    pub fn push_block(&self, logs: Vec<RawLog>) -> u64 {
        let mut state = self.state.lock().unwrap();
        let number = state.blocks.keys().next_back().map_or(0, |last| last + 1);
        let parent_hash = number
            .checked_sub(1)
            .and_then(|parent| state.blocks.get(&parent))
            .map_or(B256::ZERO, |parent| parent.hash);
        let branch = state.branch;

        let mut transactions = Vec::with_capacity(logs.len());
        for (index, mut log) in logs.into_iter().enumerate() {
            let index = index as u64;
            let tx = chain_hash(number, branch, index, 0xee);
            log.transaction_hash = tx;
            log.log_index = index;
            state.receipts.insert(tx, vec![log]);
            transactions.push(tx);
        }

        state.blocks.insert(
            number,
            BlockSummary {
                number,
                hash: chain_hash(number, branch, 0, 0xbb),
                parent_hash,
                timestamp: 1_600_000_000 + number * 12,
                transactions,
            },
        );
        number
    }

    /// Drop every block above `fork_point`; later blocks form a new branch.
    pub fn reorg(&self, fork_point: u64) {
        let mut state = self.state.lock().unwrap();
        let dropped: Vec<u64> =
            state.blocks.range(fork_point + 1..).map(|(number, _)| *number).collect();
        for number in dropped {
            if let Some(block) = state.blocks.remove(&number) {
                for tx in block.transactions {
                    state.receipts.remove(&tx);
                }
            }
        }
        state.branch += 1;
    }
}

impl ChainClient for MemoryChain {
    async fn latest_block(&self) -> IndexerResult<u64> {
        Ok(self.head())
    }

    async fn block(&self, number: u64) -> IndexerResult<Option<BlockSummary>> {
        Ok(self.state.lock().unwrap().blocks.get(&number).cloned())
    }

    async fn receipt_logs(&self, tx_hash: B256) -> IndexerResult<Option<Vec<RawLog>>> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).cloned())
    }
}
