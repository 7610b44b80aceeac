//! Logs encoded with alloy's dynamic ABI encoder decode back to the same
//! parameters through the runtime-registered bundled ABIs.

mod common;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{Bytes, I256, U256};
use num_bigint::BigInt;

use common::{addr, encode_log, uint};
use pm_event_indexer::abi::contracts::abi_for;
use pm_event_indexer::abi::decoder::Decoder;
use pm_event_indexer::abi::Value;
use pm_event_indexer::watch::{ContractRole, WatchRegistry};

fn decoder_for(roles: &[ContractRole]) -> Decoder {
    let mut decoder = Decoder::new();
    for role in roles {
        decoder.register_abi(&abi_for(*role).unwrap());
    }
    decoder
}

#[test]
fn test_indexed_and_dynamic_parameters() {
    let decoder = decoder_for(&[ContractRole::CentralizedOracleFactory]);
    let log = encode_log(
        ContractRole::CentralizedOracleFactory,
        "CentralizedOracleCreation",
        addr(0xf1),
        &[
            ("creator", DynSolValue::Address(addr(0xc1))),
            ("centralizedOracle", DynSolValue::Address(addr(0x0a))),
            (
                "ipfsHash",
                DynSolValue::Bytes(b"QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG".to_vec()),
            ),
        ],
    );

    let event = decoder.decode_log(&log).unwrap().unwrap();
    assert_eq!(event.name, "CentralizedOracleCreation");
    assert_eq!(event.address, addr(0xf1));
    assert_eq!(event.address_param("creator").unwrap(), addr(0xc1));
    assert_eq!(event.address_param("centralizedOracle").unwrap(), addr(0x0a));
    assert_eq!(
        event.param("ipfsHash").unwrap(),
        &Value::Bytes(Bytes::from_static(b"QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"))
    );
}

#[test]
fn test_signed_scalar_bounds() {
    let decoder = decoder_for(&[ContractRole::EventFactory]);
    let log = encode_log(
        ContractRole::EventFactory,
        "ScalarEventCreation",
        addr(0xf2),
        &[
            ("creator", DynSolValue::Address(addr(0xc1))),
            ("collateralToken", DynSolValue::Address(addr(0xc2))),
            ("oracle", DynSolValue::Address(addr(0x0a))),
            ("lowerBound", DynSolValue::Int(I256::from_dec_str("-1000").unwrap(), 256)),
            ("upperBound", DynSolValue::Int(I256::from_dec_str("5000").unwrap(), 256)),
            ("scalarEvent", DynSolValue::Address(addr(0x0e))),
        ],
    );

    let event = decoder.decode_log(&log).unwrap().unwrap();
    assert_eq!(event.int("lowerBound").unwrap(), &BigInt::from(-1_000));
    assert_eq!(event.int("upperBound").unwrap(), &BigInt::from(5_000));
}

#[test]
fn test_full_width_amounts_survive() {
    let decoder = decoder_for(&[ContractRole::Market]);
    let log = encode_log(
        ContractRole::Market,
        "OutcomeTokenPurchase",
        addr(0x33),
        &[
            ("buyer", DynSolValue::Address(addr(0xb1))),
            ("outcomeTokenIndex", DynSolValue::Uint(U256::from(1), 8)),
            ("outcomeTokenCount", DynSolValue::Uint(U256::MAX, 256)),
            ("outcomeTokenCost", uint(100)),
            ("marketFees", uint(10)),
        ],
    );

    let event = decoder.decode_log(&log).unwrap().unwrap();
    let max: BigInt = U256::MAX.to_string().parse().unwrap();
    assert_eq!(event.int("outcomeTokenCount").unwrap(), &max);
    assert_eq!(event.index("outcomeTokenIndex").unwrap(), 1);
    assert_eq!(event.address_param("buyer").unwrap(), addr(0xb1));
}

#[test]
fn test_shared_signature_decodes_once() {
    // Issuance and Transfer are declared by both token ABIs with identical signatures
    let decoder = decoder_for(&[ContractRole::OutcomeToken, ContractRole::TournamentToken]);
    let log = encode_log(
        ContractRole::TournamentToken,
        "Transfer",
        addr(0x77),
        &[
            ("from", DynSolValue::Address(addr(1))),
            ("to", DynSolValue::Address(addr(2))),
            ("value", uint(42)),
        ],
    );

    let events = decoder.decode(std::slice::from_ref(&log));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].int("value").unwrap(), &BigInt::from(42));
}

#[test]
fn test_unregistered_role_is_not_decoded() {
    let decoder = decoder_for(&[ContractRole::Market]);
    let log = encode_log(
        ContractRole::AddressRegistry,
        "AddressRegistration",
        addr(0xa2),
        &[
            ("registrant", DynSolValue::Address(addr(1))),
            ("registeredMainnetAddress", DynSolValue::Address(addr(2))),
        ],
    );
    assert!(decoder.decode_log(&log).unwrap().is_none());
}

#[test]
fn test_example_watch_config_registers_every_role() {
    let registry = WatchRegistry::from_json(include_str!("../config/watch.example.json")).unwrap();
    assert_eq!(registry.entries().len(), ContractRole::ALL.len());

    let log = encode_log(
        ContractRole::Market,
        "MarketClosing",
        addr(0x33),
        &[],
    );
    let event = registry.decoder().decode_log(&log).unwrap().unwrap();
    assert_eq!(event.name, "MarketClosing");
    assert!(event.params.is_empty());
}
