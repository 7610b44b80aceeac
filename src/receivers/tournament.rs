//! Tournament participants and their play-money token balance.
//!
//! Balances are only tracked for registered participants. Tokens issued to or
//! moved between unregistered accounts are ignored.

use alloy::primitives::Address;
use num_bigint::BigInt;
use sqlx::SqliteConnection;
use tracing::debug;

use super::identity::EntityKey;
use super::{db_error, ensure_absent, insert_error};
use crate::abi::{BlockInfo, DecodedEvent};
use crate::db::models::{address_key, parse_amount, sql_int, TournamentParticipantRecord};
use crate::error::{IndexerError, IndexerResult};

const ENTITY: &str = "tournament_participants";

async fn load(
    conn: &mut SqliteConnection,
    address: Address,
) -> IndexerResult<Option<TournamentParticipantRecord>> {
    sqlx::query_as::<_, TournamentParticipantRecord>(
        "SELECT * FROM tournament_participants WHERE address = ?",
    )
    .bind(address_key(&address))
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error("Failed to load tournament participant"))
}

async fn add_balance(
    conn: &mut SqliteConnection,
    participant: &TournamentParticipantRecord,
    delta: &BigInt,
) -> IndexerResult<()> {
    let balance = parse_amount(&participant.balance)? + delta;
    sqlx::query("UPDATE tournament_participants SET balance = ? WHERE address = ?")
        .bind(balance.to_string())
        .bind(&participant.address)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to update participant balance"))?;
    Ok(())
}

/// `AddressRegistration`: registers a participant with a zero balance.
pub async fn register(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    block: BlockInfo,
) -> IndexerResult<()> {
    ensure_absent(conn, ENTITY, key).await?;
    let mainnet = event.address_param("registeredMainnetAddress")?;
    sqlx::query(
        r"
        INSERT INTO tournament_participants
            (address, mainnet_address, creation_block, creation_timestamp)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(address_key(&key.primary_address()?))
    .bind(address_key(&mainnet))
    .bind(sql_int(block.number))
    .bind(sql_int(block.timestamp))
    .execute(&mut *conn)
    .await
    .map_err(insert_error(ENTITY, key))?;
    Ok(())
}

/// Undo `AddressRegistration`.
pub async fn unregister(conn: &mut SqliteConnection, key: &EntityKey) -> IndexerResult<()> {
    let deleted = sqlx::query("DELETE FROM tournament_participants WHERE address = ?")
        .bind(address_key(&key.primary_address()?))
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to delete tournament participant"))?
        .rows_affected();

    if deleted == 0 {
        return Err(IndexerError::entity_not_found(ENTITY, key.to_string()));
    }
    Ok(())
}

/// Tournament token `Issuance`. Returns `false` when the owner is not a
/// registered participant.
pub async fn issue(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
) -> IndexerResult<bool> {
    let owner = key.primary_address()?;
    let Some(participant) = load(conn, owner).await? else {
        debug!(owner = %owner, "Issuance to unregistered participant ignored");
        return Ok(false);
    };
    add_balance(conn, &participant, event.int("amount")?).await?;
    Ok(true)
}

/// Undo a tournament token `Issuance`.
pub async fn revoke_issue(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
) -> IndexerResult<()> {
    let participant = load(conn, key.primary_address()?)
        .await?
        .ok_or_else(|| IndexerError::entity_not_found(ENTITY, key.to_string()))?;
    let amount = event.int("amount")?;
    add_balance(conn, &participant, &-amount).await
}

/// Tournament token `Transfer`. Each registered party is updated; returns
/// `false` when neither is registered.
pub async fn transfer(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    undo: bool,
) -> IndexerResult<bool> {
    let value = event.int("value")?;
    let from = load(conn, key.address("from")?).await?;
    let to = load(conn, key.address("to")?).await?;
    if from.is_none() && to.is_none() {
        if undo {
            return Err(IndexerError::entity_not_found(ENTITY, key.to_string()));
        }
        return Ok(false);
    }

    let (from_delta, to_delta) = if undo {
        (value.clone(), -value)
    } else {
        (-value, value.clone())
    };
    if let Some(from) = from {
        add_balance(conn, &from, &from_delta).await?;
    }
    if let Some(to) = to {
        add_balance(conn, &to, &to_delta).await?;
    }
    Ok(true)
}
