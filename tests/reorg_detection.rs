//! Integration tests for reorg detection and rollback.
//!
//! An in-memory chain is indexed tick by tick, reorganized below the cursor
//! and indexed again. Every state change above the fork point must be undone
//! before the new branch is applied.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Bytes, I256};
use std::path::Path;

use common::{addr, encode_log, uint, MemoryChain, FUNDING};
use pm_event_indexer::abi::RawLog;
use pm_event_indexer::db::create_memory_pool;
use pm_event_indexer::db::models::{address_key, CentralizedOracleRecord, MarketRecord};
use pm_event_indexer::db::repository::Repository;
use pm_event_indexer::indexer::{Indexer, IndexerSettings, TickOutcome};
use pm_event_indexer::rollback::RollbackSummary;
use pm_event_indexer::watch::{ContractRole, WatchRegistry};

const ORACLE_WATCHES: &str = r#"[
    {
        "name": "CentralizedOracleFactory",
        "role": "centralized_oracle_factory",
        "addresses": ["0x00000000000000000000000000000000000000f1"]
    },
    {
        "name": "CentralizedOracles",
        "role": "centralized_oracle",
        "addressesGetter": "centralized_oracles"
    }
]"#;

async fn indexer(chain: MemoryChain, watches: WatchRegistry) -> Indexer<MemoryChain> {
    let repo = Repository::new(create_memory_pool().await.unwrap());
    let settings = IndexerSettings {
        max_workers: 2,
        ..IndexerSettings::default()
    };
    Indexer::new(chain, repo, watches, settings)
}

async fn oracle(indexer: &Indexer<MemoryChain>) -> CentralizedOracleRecord {
    let mut conn = indexer.repository().pool().acquire().await.unwrap();
    sqlx::query_as::<_, CentralizedOracleRecord>(
        "SELECT * FROM centralized_oracles WHERE address = ?",
    )
    .bind(address_key(&addr(0x0a)))
    .fetch_one(&mut *conn)
    .await
    .unwrap()
}

fn oracle_created() -> RawLog {
    encode_log(
        ContractRole::CentralizedOracleFactory,
        "CentralizedOracleCreation",
        addr(0xf1),
        &[
            ("creator", DynSolValue::Address(addr(0xc1))),
            ("centralizedOracle", DynSolValue::Address(addr(0x0a))),
            ("ipfsHash", DynSolValue::Bytes(b"QmOracle".to_vec())),
        ],
    )
}

#[tokio::test]
async fn test_reorg_undoes_oracle_updates() {
    let chain = MemoryChain::new();
    chain.push_block(vec![oracle_created()]);
    chain.push_block(vec![encode_log(
        ContractRole::CentralizedOracle,
        "OwnerReplacement",
        addr(0x0a),
        &[("newOwner", DynSolValue::Address(addr(0xd1)))],
    )]);
    chain.push_block(vec![encode_log(
        ContractRole::CentralizedOracle,
        "OutcomeAssignment",
        addr(0x0a),
        &[("outcome", DynSolValue::Int(I256::from_dec_str("1").unwrap(), 256))],
    )]);

    let indexer = indexer(chain, WatchRegistry::from_json(ORACLE_WATCHES).unwrap()).await;

    let outcome = indexer.tick().await.unwrap();
    let TickOutcome::Applied { from, to, head, stats } = outcome else {
        panic!("expected applied range, got {outcome:?}");
    };
    assert_eq!((from, to, head), (1, 3, 3));
    assert_eq!(stats.applied, 3);

    let applied = oracle(&indexer).await;
    assert_eq!(applied.owner, address_key(&addr(0xd1)));
    assert_eq!(applied.old_owner, Some(address_key(&addr(0xc1))));
    assert!(applied.is_outcome_set);
    assert_eq!(applied.outcome.as_deref(), Some("1"));

    // Blocks 2 and 3 are replaced by empty blocks
    indexer.client().reorg(1);
    indexer.client().push_block(Vec::new());
    indexer.client().push_block(Vec::new());

    let outcome = indexer.tick().await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::RolledBack(RollbackSummary {
            fork_point: 1,
            undone: 2,
            blocks_dropped: 2,
        })
    );
    assert!(outcome.is_catching_up());
    assert_eq!(indexer.reorg_count().await, 1);

    let restored = oracle(&indexer).await;
    assert_eq!(restored.owner, address_key(&addr(0xc1)));
    assert!(!restored.is_outcome_set);
    assert_eq!(restored.outcome, None);
    let cursor = indexer.repository().get_cursor().await.unwrap().unwrap();
    assert_eq!(cursor.last_processed_block, 1);

    // The new branch applies cleanly on top of the fork point
    let outcome = indexer.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Applied { from: 2, to: 3, .. }));
    assert_eq!(oracle(&indexer).await.owner, address_key(&addr(0xc1)));
    assert_eq!(indexer.tick().await.unwrap(), TickOutcome::UpToDate { head: 3 });
}

async fn market(indexer: &Indexer<MemoryChain>) -> MarketRecord {
    let mut conn = indexer.repository().pool().acquire().await.unwrap();
    sqlx::query_as::<_, MarketRecord>("SELECT * FROM markets WHERE address = ?")
        .bind(address_key(&addr(0x3a)))
        .fetch_one(&mut *conn)
        .await
        .unwrap()
}

async fn order_count(indexer: &Indexer<MemoryChain>) -> i64 {
    let mut conn = indexer.repository().pool().acquire().await.unwrap();
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    count
}

fn funding_log() -> RawLog {
    encode_log(ContractRole::Market, "MarketFunding", addr(0x3a), &[("funding", uint(FUNDING))])
}

#[tokio::test]
async fn test_reorg_undoes_market_trades() {
    let chain = MemoryChain::new();
    chain.push_block(vec![oracle_created()]);
    chain.push_block(vec![encode_log(
        ContractRole::EventFactory,
        "CategoricalEventCreation",
        addr(0xf2),
        &[
            ("creator", DynSolValue::Address(addr(0xc1))),
            ("collateralToken", DynSolValue::Address(addr(0xc2))),
            ("oracle", DynSolValue::Address(addr(0x0a))),
            ("outcomeCount", uint(2)),
            ("categoricalEvent", DynSolValue::Address(addr(0x0e))),
        ],
    )]);
    chain.push_block(vec![encode_log(
        ContractRole::StandardMarketFactory,
        "StandardMarketCreation",
        addr(0xf3),
        &[
            ("creator", DynSolValue::Address(addr(0xc1))),
            ("market", DynSolValue::Address(addr(0x3a))),
            ("eventContract", DynSolValue::Address(addr(0x0e))),
            ("marketMaker", DynSolValue::Address(addr(0xc3))),
            ("fee", uint(0)),
        ],
    )]);
    chain.push_block(vec![funding_log()]);
    chain.push_block(vec![encode_log(
        ContractRole::Market,
        "OutcomeTokenPurchase",
        addr(0x3a),
        &[
            ("buyer", DynSolValue::Address(addr(0xb1))),
            ("outcomeTokenIndex", uint(0)),
            ("outcomeTokenCount", uint(1_584_900_000_000_000_000)),
            ("outcomeTokenCost", uint(1_000)),
            ("marketFees", uint(25)),
        ],
    )]);

    let watches = WatchRegistry::from_file(Path::new("config/watch.example.json")).unwrap();
    let indexer = indexer(chain, watches).await;

    let outcome = indexer.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Applied { from: 1, to: 5, .. }));
    let traded = market(&indexer).await;
    assert_eq!(traded.stage, 1);
    assert_eq!(traded.collected_fees, "25");
    assert_eq!(order_count(&indexer).await, 1);

    // The funding block survives with a new hash, the purchase is gone
    indexer.client().reorg(3);
    indexer.client().push_block(vec![funding_log()]);
    indexer.client().push_block(Vec::new());

    let outcome = indexer.tick().await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::RolledBack(RollbackSummary {
            fork_point: 3,
            undone: 2,
            blocks_dropped: 2,
        })
    );
    let rewound = market(&indexer).await;
    assert_eq!(rewound.stage, 0);
    assert_eq!(rewound.funding, None);
    assert_eq!(rewound.collected_fees, "0");
    assert_eq!(rewound.trading_volume, "0");
    assert_eq!(order_count(&indexer).await, 0);

    let outcome = indexer.tick().await.unwrap();
    let TickOutcome::Applied { from: 4, to: 5, stats, .. } = outcome else {
        panic!("expected blocks 4..=5, got {outcome:?}");
    };
    assert_eq!(stats.applied, 1);
    let refunded = market(&indexer).await;
    assert_eq!(refunded.stage, 1);
    assert_eq!(refunded.net_outcome_tokens_sold, rewound.net_outcome_tokens_sold);
    assert_eq!(order_count(&indexer).await, 0);
}

#[tokio::test]
async fn test_manual_rollback_and_reapply() {
    let chain = MemoryChain::new();
    chain.push_block(vec![oracle_created()]);
    chain.push_block(vec![encode_log(
        ContractRole::CentralizedOracle,
        "OwnerReplacement",
        addr(0x0a),
        &[("newOwner", DynSolValue::Address(addr(0xd1)))],
    )]);
    let indexer = indexer(chain, WatchRegistry::from_json(ORACLE_WATCHES).unwrap()).await;
    indexer.tick().await.unwrap();

    let summary = indexer.rollback(0).await.unwrap();
    assert_eq!(summary.undone, 2);
    assert_eq!(summary.blocks_dropped, 2);
    {
        let mut conn = indexer.repository().pool().acquire().await.unwrap();
        let (oracles,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM centralized_oracles")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(oracles, 0);
    }

    // The unchanged chain is indexed again to the same state
    assert!(matches!(indexer.tick().await.unwrap(), TickOutcome::Applied { from: 1, to: 2, .. }));
    let reapplied = oracle(&indexer).await;
    assert_eq!(reapplied.owner, address_key(&addr(0xd1)));
    assert_eq!(reapplied.ipfs_hash, Bytes::from_static(b"QmOracle").to_string());
}
