//! ABIs of the prediction-market contracts, bundled at compile time.

use super::{parse_abi, AbiEntry};
use crate::error::IndexerResult;
use crate::watch::ContractRole;

const CENTRALIZED_ORACLE_FACTORY: &str = include_str!("../../abis/centralized_oracle_factory.json");
const EVENT_FACTORY: &str = include_str!("../../abis/event_factory.json");
const STANDARD_MARKET_FACTORY: &str = include_str!("../../abis/standard_market_factory.json");
const CENTRALIZED_ORACLE: &str = include_str!("../../abis/centralized_oracle.json");
const EVENT: &str = include_str!("../../abis/event.json");
const OUTCOME_TOKEN: &str = include_str!("../../abis/outcome_token.json");
const MARKET: &str = include_str!("../../abis/market.json");
const TOURNAMENT_TOKEN: &str = include_str!("../../abis/tournament_token.json");
const ADDRESS_REGISTRY: &str = include_str!("../../abis/address_registry.json");

/// Raw JSON descriptor for a contract role.
#[must_use]
pub const fn abi_json(role: ContractRole) -> &'static str {
    match role {
        ContractRole::CentralizedOracleFactory => CENTRALIZED_ORACLE_FACTORY,
        ContractRole::EventFactory => EVENT_FACTORY,
        ContractRole::StandardMarketFactory => STANDARD_MARKET_FACTORY,
        ContractRole::CentralizedOracle => CENTRALIZED_ORACLE,
        ContractRole::Event => EVENT,
        ContractRole::OutcomeToken => OUTCOME_TOKEN,
        ContractRole::Market => MARKET,
        ContractRole::TournamentToken => TOURNAMENT_TOKEN,
        ContractRole::AddressRegistry => ADDRESS_REGISTRY,
    }
}

/// Parsed ABI for a contract role.
///
/// # Errors
///
/// Returns a decoding error if the bundled descriptor is malformed.
pub fn abi_for(role: ContractRole) -> IndexerResult<Vec<AbiEntry>> {
    parse_abi(abi_json(role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiKind;

    #[test]
    fn test_every_bundled_abi_parses() {
        for role in ContractRole::ALL {
            let abi = abi_for(role).unwrap();
            assert!(
                abi.iter().any(|entry| entry.kind == AbiKind::Event),
                "{role} has no events"
            );
        }
    }

    #[test]
    fn test_market_events_present() {
        let abi = abi_for(ContractRole::Market).unwrap();
        let signatures: Vec<String> = abi.iter().map(AbiEntry::signature).collect();
        assert!(signatures
            .contains(&"OutcomeTokenPurchase(address,uint8,uint256,uint256,uint256)".to_string()));
        assert!(signatures.contains(&"MarketClosing()".to_string()));
    }
}
