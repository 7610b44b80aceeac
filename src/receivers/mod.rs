//! Receivers: turn decoded events into entity writes, and undo them.
//!
//! Every `(ContractRole, event name)` pair maps to one [`EventHandler`]. A
//! handler knows three things about its event:
//! - the [`IdentityRule`] locating the affected entity
//! - how to apply the event (`save`)
//! - how to compute and persist the pre-event state (`rollback`)
//!
//! `save` returns `Ok(None)` when the event legitimately affects nothing
//! (e.g. a tournament issuance to an unregistered account); such events are not
//! ledgered and therefore never rolled back. Domain rejections surface as
//! [`IndexerError::ValidationError`]. A rollback that cannot find its entity
//! fails with [`IndexerError::EntityNotFound`].
//!
//! ## Re-application policy
//!
//! - Creation events: a second application is a uniqueness violation
//! - Counter events (issuance, revocation, transfers, redemptions, fee
//!   withdrawals, trades): each application aggregates
//! - State-setting events (funding, closing, outcome assignment, owner
//!   replacement): overwrite

pub mod events;
pub mod identity;
pub mod markets;
pub mod oracles;
pub mod tokens;
pub mod tournament;

use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::fmt;

use crate::abi::{BlockInfo, DecodedEvent};
use crate::db::models::OrderType;
use crate::error::{IndexerError, IndexerResult};
use crate::watch::ContractRole;
use events::EventKind;
use identity::{BlockField, EntityKey, IdentityRule, KeySource, RootField};

/// Reference to the entity an applied event affected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    /// Table of the entity
    pub entity: &'static str,
    /// Rendered identity
    pub key: String,
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity, self.key)
    }
}

const EMITTER: IdentityRule = IdentityRule::Simple(KeySource::Root(RootField::Address));

const fn param(name: &'static str) -> IdentityRule {
    IdentityRule::Simple(KeySource::Param(name))
}

const TOKEN_HOLDER: IdentityRule = IdentityRule::Composite(&[
    ("token", KeySource::Root(RootField::Address)),
    ("owner", KeySource::Param("owner")),
]);

const TOKEN_TRANSFER: IdentityRule = IdentityRule::Composite(&[
    ("token", KeySource::Root(RootField::Address)),
    ("from", KeySource::Param("from")),
    ("to", KeySource::Param("to")),
]);

const BUY_ORDER: IdentityRule = IdentityRule::Composite(&[
    ("market", KeySource::Root(RootField::Address)),
    ("sender", KeySource::Param("buyer")),
    ("creation_block", KeySource::Block(BlockField::Number)),
    ("log_index", KeySource::Root(RootField::LogIndex)),
]);

const SELL_ORDER: IdentityRule = IdentityRule::Composite(&[
    ("market", KeySource::Root(RootField::Address)),
    ("sender", KeySource::Param("seller")),
    ("creation_block", KeySource::Block(BlockField::Number)),
    ("log_index", KeySource::Root(RootField::LogIndex)),
]);

const PARTICIPANT_TRANSFER: IdentityRule = IdentityRule::Composite(&[
    ("from", KeySource::Param("from")),
    ("to", KeySource::Param("to")),
]);

/// One handled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventHandler {
    /// Oracle factory `CentralizedOracleCreation`
    CentralizedOracleCreation,
    /// Event factory `CategoricalEventCreation`
    CategoricalEventCreation,
    /// Event factory `ScalarEventCreation`
    ScalarEventCreation,
    /// Market factory `StandardMarketCreation`
    StandardMarketCreation,
    /// Oracle `OwnerReplacement`
    OracleOwnerReplacement,
    /// Oracle `OutcomeAssignment`
    OracleOutcomeAssignment,
    /// Event `OutcomeTokenCreation`
    OutcomeTokenCreation,
    /// Event `OutcomeAssignment`
    EventOutcomeAssignment,
    /// Event `WinningsRedemption`
    WinningsRedemption,
    /// Outcome token `Issuance`
    OutcomeTokenIssuance,
    /// Outcome token `Revocation`
    OutcomeTokenRevocation,
    /// Outcome token `Transfer`
    OutcomeTokenTransfer,
    /// Market `MarketFunding`
    MarketFunding,
    /// Market `MarketClosing`
    MarketClosing,
    /// Market `FeeWithdrawal`
    FeeWithdrawal,
    /// Market `OutcomeTokenPurchase`
    OutcomeTokenPurchase,
    /// Market `OutcomeTokenSale`
    OutcomeTokenSale,
    /// Market `OutcomeTokenShortSale`
    OutcomeTokenShortSale,
    /// Tournament token `Issuance`
    TournamentIssuance,
    /// Tournament token `Transfer`
    TournamentTransfer,
    /// Registry `AddressRegistration`
    AddressRegistration,
}

impl EventHandler {
    /// Identity rule shared by apply and rollback.
    #[must_use]
    pub const fn identity(self) -> IdentityRule {
        match self {
            Self::CentralizedOracleCreation => param("centralizedOracle"),
            Self::CategoricalEventCreation => param("categoricalEvent"),
            Self::ScalarEventCreation => param("scalarEvent"),
            Self::StandardMarketCreation => param("market"),
            Self::OutcomeTokenCreation => param("outcomeToken"),
            Self::OracleOwnerReplacement
            | Self::OracleOutcomeAssignment
            | Self::EventOutcomeAssignment
            | Self::WinningsRedemption
            | Self::MarketFunding
            | Self::MarketClosing
            | Self::FeeWithdrawal => EMITTER,
            Self::OutcomeTokenIssuance | Self::OutcomeTokenRevocation => TOKEN_HOLDER,
            Self::OutcomeTokenTransfer => TOKEN_TRANSFER,
            Self::OutcomeTokenPurchase | Self::OutcomeTokenShortSale => BUY_ORDER,
            Self::OutcomeTokenSale => SELL_ORDER,
            Self::TournamentIssuance => param("owner"),
            Self::TournamentTransfer => PARTICIPANT_TRANSFER,
            Self::AddressRegistration => param("registrant"),
        }
    }

    /// Table of the entity the event affects.
    #[must_use]
    pub const fn entity(self) -> &'static str {
        match self {
            Self::CentralizedOracleCreation
            | Self::OracleOwnerReplacement
            | Self::OracleOutcomeAssignment => "centralized_oracles",
            Self::CategoricalEventCreation
            | Self::ScalarEventCreation
            | Self::EventOutcomeAssignment
            | Self::WinningsRedemption => "event_contracts",
            Self::OutcomeTokenCreation
            | Self::OutcomeTokenIssuance
            | Self::OutcomeTokenRevocation
            | Self::OutcomeTokenTransfer => "outcome_tokens",
            Self::StandardMarketCreation
            | Self::MarketFunding
            | Self::MarketClosing
            | Self::FeeWithdrawal => "markets",
            Self::OutcomeTokenPurchase | Self::OutcomeTokenSale | Self::OutcomeTokenShortSale => {
                "orders"
            }
            Self::TournamentIssuance | Self::TournamentTransfer | Self::AddressRegistration => {
                "tournament_participants"
            }
        }
    }

    /// Apply `event`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the event is rejected, or a database
    /// error when persistence fails.
    pub async fn save(
        self,
        conn: &mut SqliteConnection,
        event: &DecodedEvent,
        block: BlockInfo,
    ) -> IndexerResult<Option<EntityRef>> {
        let key = self.identity().resolve(event, block)?;
        let applied = match self {
            Self::TournamentIssuance => tournament::issue(conn, event, &key).await?,
            Self::TournamentTransfer => tournament::transfer(conn, event, &key, false).await?,
            _ => {
                self.apply(conn, event, &key, block).await?;
                true
            }
        };

        Ok(applied.then(|| EntityRef {
            entity: self.entity(),
            key: key.to_string(),
        }))
    }

    /// Apply an event that always affects its entity.
    async fn apply(
        self,
        conn: &mut SqliteConnection,
        event: &DecodedEvent,
        key: &EntityKey,
        block: BlockInfo,
    ) -> IndexerResult<()> {
        match self {
            Self::CentralizedOracleCreation => oracles::create(conn, event, key, block).await,
            Self::CategoricalEventCreation => {
                events::create(conn, event, key, block, EventKind::Categorical).await
            }
            Self::ScalarEventCreation => {
                events::create(conn, event, key, block, EventKind::Scalar).await
            }
            Self::StandardMarketCreation => markets::create(conn, event, key, block).await,
            Self::OracleOwnerReplacement => oracles::replace_owner(conn, event, key, block).await,
            Self::OracleOutcomeAssignment => oracles::assign_outcome(conn, event, key).await,
            Self::OutcomeTokenCreation => {
                events::create_outcome_token(conn, event, key, block).await
            }
            Self::EventOutcomeAssignment => events::assign_outcome(conn, event, key).await,
            Self::WinningsRedemption => events::redeem_winnings(conn, event, key, false).await,
            Self::OutcomeTokenIssuance => tokens::change_supply(conn, event, key, 1, false).await,
            Self::OutcomeTokenRevocation => {
                tokens::change_supply(conn, event, key, -1, false).await
            }
            Self::OutcomeTokenTransfer => tokens::transfer(conn, event, key, false).await,
            Self::MarketFunding => markets::fund(conn, event, key, false).await,
            Self::MarketClosing => markets::close(conn, event, key, false).await,
            Self::FeeWithdrawal => markets::withdraw_fees(conn, event, key, false).await,
            Self::OutcomeTokenPurchase => {
                markets::trade(conn, event, key, block, OrderType::Buy).await
            }
            Self::OutcomeTokenSale => {
                markets::trade(conn, event, key, block, OrderType::Sell).await
            }
            Self::OutcomeTokenShortSale => {
                markets::trade(conn, event, key, block, OrderType::ShortSell).await
            }
            Self::AddressRegistration => tournament::register(conn, event, key, block).await,
            Self::TournamentIssuance | Self::TournamentTransfer => Ok(()),
        }
    }

    /// Persist the state `event` was applied to.
    ///
    /// `block` must be the block the event was applied from, so composite
    /// identities that use block fields resolve to the same entity.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::EntityNotFound`] when the affected entity is
    /// gone, or a database error when persistence fails.
    pub async fn rollback(
        self,
        conn: &mut SqliteConnection,
        event: &DecodedEvent,
        block: BlockInfo,
    ) -> IndexerResult<()> {
        let key = self.identity().resolve(event, block)?;
        match self {
            Self::CentralizedOracleCreation => oracles::delete(conn, &key).await,
            Self::CategoricalEventCreation | Self::ScalarEventCreation => {
                events::delete(conn, &key).await
            }
            Self::StandardMarketCreation => markets::delete(conn, &key).await,
            Self::OracleOwnerReplacement => oracles::restore_owner(conn, &key).await,
            Self::OracleOutcomeAssignment => oracles::clear_outcome(conn, &key).await,
            Self::OutcomeTokenCreation => events::delete_outcome_token(conn, &key).await,
            Self::EventOutcomeAssignment => events::clear_outcome(conn, &key).await,
            Self::WinningsRedemption => events::redeem_winnings(conn, event, &key, true).await,
            Self::OutcomeTokenIssuance => tokens::change_supply(conn, event, &key, 1, true).await,
            Self::OutcomeTokenRevocation => {
                tokens::change_supply(conn, event, &key, -1, true).await
            }
            Self::OutcomeTokenTransfer => tokens::transfer(conn, event, &key, true).await,
            Self::MarketFunding => markets::fund(conn, event, &key, true).await,
            Self::MarketClosing => markets::close(conn, event, &key, true).await,
            Self::FeeWithdrawal => markets::withdraw_fees(conn, event, &key, true).await,
            Self::OutcomeTokenPurchase => {
                markets::undo_trade(conn, event, &key, OrderType::Buy).await
            }
            Self::OutcomeTokenSale => markets::undo_trade(conn, event, &key, OrderType::Sell).await,
            Self::OutcomeTokenShortSale => {
                markets::undo_trade(conn, event, &key, OrderType::ShortSell).await
            }
            Self::TournamentIssuance => tournament::revoke_issue(conn, event, &key).await,
            Self::TournamentTransfer => {
                tournament::transfer(conn, event, &key, true).await.map(|_| ())
            }
            Self::AddressRegistration => tournament::unregister(conn, &key).await,
        }
    }
}

/// Every handler, keyed by role and event name.
const HANDLERS: [(ContractRole, &str, EventHandler); 21] = [
    (
        ContractRole::CentralizedOracleFactory,
        "CentralizedOracleCreation",
        EventHandler::CentralizedOracleCreation,
    ),
    (
        ContractRole::EventFactory,
        "CategoricalEventCreation",
        EventHandler::CategoricalEventCreation,
    ),
    (ContractRole::EventFactory, "ScalarEventCreation", EventHandler::ScalarEventCreation),
    (
        ContractRole::StandardMarketFactory,
        "StandardMarketCreation",
        EventHandler::StandardMarketCreation,
    ),
    (ContractRole::CentralizedOracle, "OwnerReplacement", EventHandler::OracleOwnerReplacement),
    (ContractRole::CentralizedOracle, "OutcomeAssignment", EventHandler::OracleOutcomeAssignment),
    (ContractRole::Event, "OutcomeTokenCreation", EventHandler::OutcomeTokenCreation),
    (ContractRole::Event, "OutcomeAssignment", EventHandler::EventOutcomeAssignment),
    (ContractRole::Event, "WinningsRedemption", EventHandler::WinningsRedemption),
    (ContractRole::OutcomeToken, "Issuance", EventHandler::OutcomeTokenIssuance),
    (ContractRole::OutcomeToken, "Revocation", EventHandler::OutcomeTokenRevocation),
    (ContractRole::OutcomeToken, "Transfer", EventHandler::OutcomeTokenTransfer),
    (ContractRole::Market, "MarketFunding", EventHandler::MarketFunding),
    (ContractRole::Market, "MarketClosing", EventHandler::MarketClosing),
    (ContractRole::Market, "FeeWithdrawal", EventHandler::FeeWithdrawal),
    (ContractRole::Market, "OutcomeTokenPurchase", EventHandler::OutcomeTokenPurchase),
    (ContractRole::Market, "OutcomeTokenSale", EventHandler::OutcomeTokenSale),
    (ContractRole::Market, "OutcomeTokenShortSale", EventHandler::OutcomeTokenShortSale),
    (ContractRole::TournamentToken, "Issuance", EventHandler::TournamentIssuance),
    (ContractRole::TournamentToken, "Transfer", EventHandler::TournamentTransfer),
    (ContractRole::AddressRegistry, "AddressRegistration", EventHandler::AddressRegistration),
];

/// Handlers keyed by `(ContractRole, event name)`.
#[derive(Debug, Clone)]
pub struct ReceiverRegistry {
    handlers: HashMap<ContractRole, HashMap<&'static str, EventHandler>>,
}

impl Default for ReceiverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverRegistry {
    /// The registry of every handled event.
    #[must_use]
    pub fn new() -> Self {
        let mut handlers: HashMap<ContractRole, HashMap<&'static str, EventHandler>> =
            HashMap::new();
        for (role, name, handler) in HANDLERS {
            handlers.entry(role).or_default().insert(name, handler);
        }
        Self { handlers }
    }

    /// Handler for an event emitted by a contract of `role`.
    #[must_use]
    pub fn handler(&self, role: ContractRole, name: &str) -> Option<EventHandler> {
        self.handlers.get(&role)?.get(name).copied()
    }

    /// Event names handled for `role`, sorted.
    #[must_use]
    pub fn events_for(&self, role: ContractRole) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .handlers
            .get(&role)
            .map(|events| events.keys().copied().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }
}

/// Maps a query failure to a database error with context.
pub(crate) fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> IndexerError {
    move |e| IndexerError::database(context, Some(Box::new(e)))
}

/// Rejects a creation event whose entity already exists.
pub(crate) async fn ensure_absent(
    conn: &mut SqliteConnection,
    entity: &'static str,
    key: &EntityKey,
) -> IndexerResult<()> {
    let query = format!("SELECT EXISTS (SELECT 1 FROM {entity} WHERE address = ?)");
    let (exists,): (bool,) = sqlx::query_as(&query)
        .bind(crate::db::models::address_key(&key.primary_address()?))
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error("Failed to check entity uniqueness"))?;
    if exists {
        return Err(IndexerError::validation(format!(
            "Uniqueness violation: {entity} {key} already exists"
        )));
    }
    Ok(())
}

/// Maps an insert failure, reporting uniqueness violations as validation errors.
pub(crate) fn insert_error(
    entity: &'static str,
    key: &EntityKey,
) -> impl FnOnce(sqlx::Error) -> IndexerError {
    let key = key.to_string();
    move |e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return IndexerError::validation(format!(
                    "Uniqueness violation: {entity} {key} already exists"
                ));
            }
        }
        IndexerError::database(format!("Failed to insert into {entity}"), Some(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::contracts::abi_for;
    use crate::abi::{AbiKind, Value};
    use crate::db::create_memory_pool;
    use alloy::primitives::{address, Address, Bytes};

    #[test]
    fn test_every_handler_matches_a_bundled_event() {
        for (role, name, _) in HANDLERS {
            let abi = abi_for(role).unwrap();
            let found = abi
                .iter()
                .any(|entry| entry.kind == AbiKind::Event && entry.name.as_deref() == Some(name));
            assert!(found, "{role} has no event {name}");
        }
    }

    #[test]
    fn test_same_name_routes_by_role() {
        let registry = ReceiverRegistry::new();
        assert_eq!(
            registry.handler(ContractRole::OutcomeToken, "Issuance"),
            Some(EventHandler::OutcomeTokenIssuance)
        );
        assert_eq!(
            registry.handler(ContractRole::TournamentToken, "Issuance"),
            Some(EventHandler::TournamentIssuance)
        );
        assert_eq!(registry.handler(ContractRole::OutcomeToken, "Approval"), None);
        assert_eq!(registry.events_for(ContractRole::Event).len(), 3);
    }

    #[test]
    fn test_transfer_and_issuance_use_different_identities() {
        assert_eq!(EventHandler::OutcomeTokenIssuance.identity(), TOKEN_HOLDER);
        assert_eq!(EventHandler::OutcomeTokenTransfer.identity(), TOKEN_TRANSFER);
    }

    #[tokio::test]
    async fn test_owner_replacement_round_trip() {
        let pool = create_memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let factory = address!("00000000000000000000000000000000000000f1");
        let oracle = address!("00000000000000000000000000000000000000a1");
        let creator = address!("00000000000000000000000000000000000000c1");
        let block = BlockInfo::new(5, 50);

        let creation = DecodedEvent::new(
            factory,
            "CentralizedOracleCreation",
            [
                ("creator", Value::from(creator)),
                ("centralizedOracle", Value::from(oracle)),
                ("ipfsHash", Value::Bytes(Bytes::from_static(b"Qm"))),
            ],
        );
        EventHandler::CentralizedOracleCreation.save(&mut conn, &creation, block).await.unwrap();

        let replacement = DecodedEvent::new(
            oracle,
            "OwnerReplacement",
            [("newOwner", Value::from(Address::repeat_byte(0xee)))],
        );
        let applied = EventHandler::OracleOwnerReplacement
            .save(&mut conn, &replacement, block)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied.entity, "centralized_oracles");

        let (owner, old_owner): (String, Option<String>) =
            sqlx::query_as("SELECT owner, old_owner FROM centralized_oracles")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        assert_eq!(owner, format!("{:?}", Address::repeat_byte(0xee)));
        assert_eq!(old_owner, Some(format!("{creator:?}")));

        EventHandler::OracleOwnerReplacement
            .rollback(&mut conn, &replacement, block)
            .await
            .unwrap();
        let (owner,): (String,) = sqlx::query_as("SELECT owner FROM centralized_oracles")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(owner, format!("{creator:?}"));
    }

    #[tokio::test]
    async fn test_state_setting_events_on_unknown_entity_are_rejected() {
        let pool = create_memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let funding = DecodedEvent::new(
            Address::repeat_byte(0x33),
            "MarketFunding",
            [("funding", Value::from(100u64))],
        );
        let err = EventHandler::MarketFunding
            .save(&mut conn, &funding, BlockInfo::new(1, 0))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = EventHandler::MarketFunding
            .rollback(&mut conn, &funding, BlockInfo::new(1, 0))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
