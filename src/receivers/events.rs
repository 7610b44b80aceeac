//! Event factory and event contract handlers.
//!
//! Categorical and scalar events share one table; scalar events always have two
//! outcomes and carry their bounds.

use num_bigint::BigInt;
use sqlx::SqliteConnection;
use tracing::debug;

use super::identity::EntityKey;
use super::{db_error, ensure_absent, insert_error};
use crate::abi::{BlockInfo, DecodedEvent};
use crate::db::models::{address_key, parse_amount, sql_int, EventContractRecord};
use crate::error::{IndexerError, IndexerResult};

const ENTITY: &str = "event_contracts";
const TOKENS: &str = "outcome_tokens";

/// Event contract creation flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `CategoricalEventCreation`
    Categorical,
    /// `ScalarEventCreation`
    Scalar,
}

impl EventKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Categorical => "categorical",
            Self::Scalar => "scalar",
        }
    }
}

/// Load an event contract by address.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn load(
    conn: &mut SqliteConnection,
    address: &str,
) -> IndexerResult<Option<EventContractRecord>> {
    sqlx::query_as::<_, EventContractRecord>("SELECT * FROM event_contracts WHERE address = ?")
        .bind(address)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("Failed to load event contract"))
}

async fn oracle_exists(conn: &mut SqliteConnection, oracle: &str) -> IndexerResult<bool> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM centralized_oracles WHERE address = ?)")
            .bind(oracle)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_error("Failed to check oracle"))?;
    Ok(exists)
}

/// `CategoricalEventCreation` / `ScalarEventCreation`. The oracle must be indexed.
pub async fn create(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    block: BlockInfo,
    kind: EventKind,
) -> IndexerResult<()> {
    ensure_absent(conn, ENTITY, key).await?;
    let oracle = address_key(&event.address_param("oracle")?);
    if !oracle_exists(conn, &oracle).await? {
        return Err(IndexerError::validation(format!(
            "{} references unknown oracle {oracle}",
            event.name
        )));
    }

    let (outcome_count, lower_bound, upper_bound) = match kind {
        EventKind::Categorical => {
            let count = event.index("outcomeCount")?;
            if count < 2 {
                return Err(IndexerError::validation(format!(
                    "{} declares {count} outcomes",
                    event.name
                )));
            }
            (count, None, None)
        }
        EventKind::Scalar => {
            let lower = event.int("lowerBound")?;
            let upper = event.int("upperBound")?;
            if lower >= upper {
                return Err(IndexerError::validation(format!(
                    "{} bounds are inverted: {lower} >= {upper}",
                    event.name
                )));
            }
            (2, Some(lower.to_string()), Some(upper.to_string()))
        }
    };

    sqlx::query(
        r"
        INSERT INTO event_contracts (
            address, factory, creator, kind, collateral_token, oracle, outcome_count,
            lower_bound, upper_bound, creation_block, creation_timestamp
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(address_key(&key.primary_address()?))
    .bind(address_key(&event.address))
    .bind(address_key(&event.address_param("creator")?))
    .bind(kind.as_str())
    .bind(address_key(&event.address_param("collateralToken")?))
    .bind(&oracle)
    .bind(i64::try_from(outcome_count).unwrap_or(i64::MAX))
    .bind(lower_bound)
    .bind(upper_bound)
    .bind(sql_int(block.number))
    .bind(sql_int(block.timestamp))
    .execute(&mut *conn)
    .await
    .map_err(insert_error(ENTITY, key))?;

    debug!(event_contract = %key, kind = kind.as_str(), outcome_count, "Event contract created");
    Ok(())
}

/// Undo an event creation.
pub async fn delete(conn: &mut SqliteConnection, key: &EntityKey) -> IndexerResult<()> {
    let deleted = sqlx::query("DELETE FROM event_contracts WHERE address = ?")
        .bind(address_key(&key.primary_address()?))
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to delete event contract"))?
        .rows_affected();

    if deleted == 0 {
        return Err(IndexerError::entity_not_found(ENTITY, key.to_string()));
    }
    Ok(())
}

async fn require(
    conn: &mut SqliteConnection,
    key: &EntityKey,
    apply: Option<&DecodedEvent>,
) -> IndexerResult<EventContractRecord> {
    let address = address_key(&key.primary_address()?);
    load(conn, &address).await?.ok_or_else(|| match apply {
        Some(event) => {
            IndexerError::validation(format!("{} for unknown event contract {key}", event.name))
        }
        None => IndexerError::entity_not_found(ENTITY, key.to_string()),
    })
}

/// `OutcomeTokenCreation`: the emitting event contract owns the token.
pub async fn create_outcome_token(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    block: BlockInfo,
) -> IndexerResult<()> {
    let owner = address_key(&event.address);
    let Some(contract) = load(conn, &owner).await? else {
        return Err(IndexerError::validation(format!(
            "{} emitted by unknown event contract {owner}",
            event.name
        )));
    };
    ensure_absent(conn, TOKENS, key).await?;
    let index = event.index("index")?;
    if i64::try_from(index).map_or(true, |index| index >= contract.outcome_count) {
        return Err(IndexerError::validation(format!(
            "Outcome index {index} out of range for {owner} with {} outcomes",
            contract.outcome_count
        )));
    }

    sqlx::query(
        r"
        INSERT INTO outcome_tokens
            (address, event, outcome_index, creation_block, creation_timestamp)
        VALUES (?, ?, ?, ?, ?)
        ",
    )
    .bind(address_key(&key.primary_address()?))
    .bind(&owner)
    .bind(i64::try_from(index).unwrap_or(i64::MAX))
    .bind(sql_int(block.number))
    .bind(sql_int(block.timestamp))
    .execute(&mut *conn)
    .await
    .map_err(insert_error(TOKENS, key))?;
    Ok(())
}

/// Undo `OutcomeTokenCreation`.
pub async fn delete_outcome_token(
    conn: &mut SqliteConnection,
    key: &EntityKey,
) -> IndexerResult<()> {
    let deleted = sqlx::query("DELETE FROM outcome_tokens WHERE address = ?")
        .bind(address_key(&key.primary_address()?))
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to delete outcome token"))?
        .rows_affected();

    if deleted == 0 {
        return Err(IndexerError::entity_not_found(TOKENS, key.to_string()));
    }
    Ok(())
}

/// `OutcomeAssignment` on an event contract.
pub async fn assign_outcome(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
) -> IndexerResult<()> {
    let contract = require(conn, key, Some(event)).await?;
    set_outcome(conn, &contract.address, Some(event.int("outcome")?.to_string())).await
}

/// Undo `OutcomeAssignment` on an event contract.
pub async fn clear_outcome(conn: &mut SqliteConnection, key: &EntityKey) -> IndexerResult<()> {
    let contract = require(conn, key, None).await?;
    set_outcome(conn, &contract.address, None).await
}

async fn set_outcome(
    conn: &mut SqliteConnection,
    address: &str,
    outcome: Option<String>,
) -> IndexerResult<()> {
    sqlx::query(
        "UPDATE event_contracts SET is_winning_outcome_set = ?, outcome = ? WHERE address = ?",
    )
    .bind(outcome.is_some())
    .bind(outcome)
    .bind(address)
    .execute(&mut *conn)
    .await
    .map_err(db_error("Failed to update event outcome"))?;
    Ok(())
}

/// `WinningsRedemption` (apply) and its inverse.
pub async fn redeem_winnings(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    undo: bool,
) -> IndexerResult<()> {
    let contract = require(conn, key, (!undo).then_some(event)).await?;
    let winnings = event.int("winnings")?;
    let redeemed: BigInt = parse_amount(&contract.redeemed_winnings)?;
    let redeemed = if undo { redeemed - winnings } else { redeemed + winnings };

    sqlx::query("UPDATE event_contracts SET redeemed_winnings = ? WHERE address = ?")
        .bind(redeemed.to_string())
        .bind(&contract.address)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to update redeemed winnings"))?;
    Ok(())
}
