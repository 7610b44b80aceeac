//! Centralized oracle factory and centralized oracle events.

use sqlx::SqliteConnection;
use tracing::debug;

use super::identity::EntityKey;
use super::{db_error, ensure_absent, insert_error};
use crate::abi::{BlockInfo, DecodedEvent};
use crate::db::models::{address_key, sql_int, CentralizedOracleRecord};
use crate::error::{IndexerError, IndexerResult};

const ENTITY: &str = "centralized_oracles";

async fn load(
    conn: &mut SqliteConnection,
    key: &EntityKey,
) -> IndexerResult<Option<CentralizedOracleRecord>> {
    sqlx::query_as::<_, CentralizedOracleRecord>(
        "SELECT * FROM centralized_oracles WHERE address = ?",
    )
    .bind(address_key(&key.primary_address()?))
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error("Failed to load centralized oracle"))
}

async fn require(
    conn: &mut SqliteConnection,
    key: &EntityKey,
) -> IndexerResult<CentralizedOracleRecord> {
    load(conn, key)
        .await?
        .ok_or_else(|| IndexerError::entity_not_found(ENTITY, key.to_string()))
}

async fn require_for_apply(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
) -> IndexerResult<CentralizedOracleRecord> {
    load(conn, key).await?.ok_or_else(|| {
        IndexerError::validation(format!("{} for unknown centralized oracle {key}", event.name))
    })
}

/// `CentralizedOracleCreation`: the creator becomes the first owner.
pub async fn create(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    block: BlockInfo,
) -> IndexerResult<()> {
    ensure_absent(conn, ENTITY, key).await?;
    let creator = event.address_param("creator")?;
    let ipfs_hash = event.param("ipfsHash")?.to_string();

    sqlx::query(
        r"
        INSERT INTO centralized_oracles (
            address, factory, creator, owner, ipfs_hash, creation_block, creation_timestamp
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(address_key(&key.primary_address()?))
    .bind(address_key(&event.address))
    .bind(address_key(&creator))
    .bind(address_key(&creator))
    .bind(ipfs_hash)
    .bind(sql_int(block.number))
    .bind(sql_int(block.timestamp))
    .execute(&mut *conn)
    .await
    .map_err(insert_error(ENTITY, key))?;

    debug!(oracle = %key, "Centralized oracle created");
    Ok(())
}

/// Undo `CentralizedOracleCreation`.
pub async fn delete(conn: &mut SqliteConnection, key: &EntityKey) -> IndexerResult<()> {
    let deleted = sqlx::query("DELETE FROM centralized_oracles WHERE address = ?")
        .bind(address_key(&key.primary_address()?))
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to delete centralized oracle"))?
        .rows_affected();

    if deleted == 0 {
        return Err(IndexerError::entity_not_found(ENTITY, key.to_string()));
    }
    Ok(())
}

async fn set_owner(
    conn: &mut SqliteConnection,
    oracle: &CentralizedOracleRecord,
    owner: &str,
    old_owner: Option<&str>,
) -> IndexerResult<()> {
    sqlx::query("UPDATE centralized_oracles SET owner = ?, old_owner = ? WHERE address = ?")
        .bind(owner)
        .bind(old_owner)
        .bind(&oracle.address)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to update oracle owner"))?;
    Ok(())
}

/// `OwnerReplacement`: the replaced owner fields are pushed onto the oracle's
/// owner history.
pub async fn replace_owner(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    block: BlockInfo,
) -> IndexerResult<()> {
    let oracle = require_for_apply(conn, event, key).await?;
    let new_owner = address_key(&event.address_param("newOwner")?);

    sqlx::query(
        "INSERT INTO oracle_owner_history (oracle, owner, old_owner, block_number) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&oracle.address)
    .bind(&oracle.owner)
    .bind(&oracle.old_owner)
    .bind(sql_int(block.number))
    .execute(&mut *conn)
    .await
    .map_err(db_error("Failed to record replaced owner"))?;

    set_owner(conn, &oracle, &new_owner, Some(&oracle.owner)).await
}

/// Undo `OwnerReplacement`: pops the newest owner history entry.
pub async fn restore_owner(conn: &mut SqliteConnection, key: &EntityKey) -> IndexerResult<()> {
    let oracle = require(conn, key).await?;
    let replaced: Option<(i64, String, Option<String>)> = sqlx::query_as(
        r"
        SELECT id, owner, old_owner FROM oracle_owner_history
        WHERE oracle = ?
        ORDER BY id DESC
        LIMIT 1
        ",
    )
    .bind(&oracle.address)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error("Failed to load owner history"))?;

    let Some((id, owner, old_owner)) = replaced else {
        return Err(IndexerError::state(
            format!("Centralized oracle {key} has no previous owner to restore"),
            None,
        ));
    };

    sqlx::query("DELETE FROM oracle_owner_history WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to pop owner history"))?;

    set_owner(conn, &oracle, &owner, old_owner.as_deref()).await
}

async fn set_outcome(
    conn: &mut SqliteConnection,
    oracle: &CentralizedOracleRecord,
    outcome: Option<String>,
) -> IndexerResult<()> {
    sqlx::query("UPDATE centralized_oracles SET is_outcome_set = ?, outcome = ? WHERE address = ?")
        .bind(outcome.is_some())
        .bind(outcome)
        .bind(&oracle.address)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to update oracle outcome"))?;
    Ok(())
}

/// `OutcomeAssignment` on an oracle.
pub async fn assign_outcome(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
) -> IndexerResult<()> {
    let oracle = require_for_apply(conn, event, key).await?;
    let outcome = event.int("outcome")?.to_string();
    set_outcome(conn, &oracle, Some(outcome)).await
}

/// Undo `OutcomeAssignment` on an oracle.
pub async fn clear_outcome(conn: &mut SqliteConnection, key: &EntityKey) -> IndexerResult<()> {
    let oracle = require(conn, key).await?;
    set_outcome(conn, &oracle, None).await
}
