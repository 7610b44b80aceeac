//! Outcome token supply and balances.
//!
//! Balances that reach zero are deleted, so an issuance followed by its
//! rollback leaves no balance row behind.

use alloy::primitives::Address;
use num_bigint::BigInt;
use num_traits::Zero;
use sqlx::SqliteConnection;
use tracing::warn;

use super::db_error;
use super::identity::EntityKey;
use crate::abi::DecodedEvent;
use crate::db::models::{address_key, parse_amount, OutcomeTokenRecord};
use crate::error::{IndexerError, IndexerResult};

const ENTITY: &str = "outcome_tokens";

async fn require(
    conn: &mut SqliteConnection,
    key: &EntityKey,
    apply: Option<&DecodedEvent>,
) -> IndexerResult<OutcomeTokenRecord> {
    let token = address_key(&key.address("token")?);
    sqlx::query_as::<_, OutcomeTokenRecord>("SELECT * FROM outcome_tokens WHERE address = ?")
        .bind(&token)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("Failed to load outcome token"))?
        .ok_or_else(|| match apply {
            Some(event) => {
                IndexerError::validation(format!("{} on unknown outcome token {token}", event.name))
            }
            None => IndexerError::entity_not_found(ENTITY, key.to_string()),
        })
}

/// Current balance of `owner`, zero when no row exists.
///
/// # Errors
///
/// Returns a database error if the query fails or the stored amount is invalid.
pub async fn balance_of(
    conn: &mut SqliteConnection,
    token: &str,
    owner: Address,
) -> IndexerResult<BigInt> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT balance FROM outcome_token_balances WHERE outcome_token = ? AND owner = ?",
    )
    .bind(token)
    .bind(address_key(&owner))
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error("Failed to load outcome token balance"))?;
    row.map_or_else(|| Ok(BigInt::zero()), |(balance,)| parse_amount(&balance))
}

async fn adjust_balance(
    conn: &mut SqliteConnection,
    token: &str,
    owner: Address,
    delta: &BigInt,
) -> IndexerResult<()> {
    let balance = balance_of(conn, token, owner).await? + delta;
    if balance < BigInt::zero() {
        warn!(token, owner = %owner, %balance, "Outcome token balance went negative");
    }

    if balance.is_zero() {
        sqlx::query("DELETE FROM outcome_token_balances WHERE outcome_token = ? AND owner = ?")
            .bind(token)
            .bind(address_key(&owner))
            .execute(&mut *conn)
            .await
            .map_err(db_error("Failed to delete outcome token balance"))?;
    } else {
        sqlx::query(
            r"
            INSERT INTO outcome_token_balances (outcome_token, owner, balance)
            VALUES (?, ?, ?)
            ON CONFLICT (outcome_token, owner) DO UPDATE SET balance = excluded.balance
            ",
        )
        .bind(token)
        .bind(address_key(&owner))
        .bind(balance.to_string())
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to update outcome token balance"))?;
    }
    Ok(())
}

async fn adjust_supply(
    conn: &mut SqliteConnection,
    token: &OutcomeTokenRecord,
    delta: &BigInt,
) -> IndexerResult<()> {
    let supply = parse_amount(&token.total_supply)? + delta;
    sqlx::query("UPDATE outcome_tokens SET total_supply = ? WHERE address = ?")
        .bind(supply.to_string())
        .bind(&token.address)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to update outcome token supply"))?;
    Ok(())
}

/// `Issuance` (`sign = 1`) and `Revocation` (`sign = -1`); rollback passes the
/// opposite sign.
pub async fn change_supply(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    sign: i8,
    undo: bool,
) -> IndexerResult<()> {
    let token = require(conn, key, (!undo).then_some(event)).await?;
    let delta = event.int("amount")? * BigInt::from(if undo { -sign } else { sign });
    adjust_supply(conn, &token, &delta).await?;
    adjust_balance(conn, &token.address, key.address("owner")?, &delta).await
}

/// `Transfer` between two holders of the same token.
pub async fn transfer(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    undo: bool,
) -> IndexerResult<()> {
    let token = require(conn, key, (!undo).then_some(event)).await?;
    let value = event.int("value")?;
    let (debit, credit) = if undo {
        (key.address("to")?, key.address("from")?)
    } else {
        (key.address("from")?, key.address("to")?)
    };
    adjust_balance(conn, &token.address, debit, &-value).await?;
    adjust_balance(conn, &token.address, credit, value).await
}
