//! Standard market factory and LMSR market handlers.
//!
//! Trades update the market's net outcome tokens sold vector and fee/volume
//! aggregates, and record an order carrying the marginal prices after the trade.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use super::identity::EntityKey;
use super::{db_error, ensure_absent, events, insert_error};
use crate::abi::{BlockInfo, DecodedEvent};
use crate::db::models::{
    address_key, encode_amounts, hash_key, parse_amount, sql_int, MarketRecord, MarketStage,
    OrderType,
};
use crate::error::{IndexerError, IndexerResult};
use crate::pricing::{calc_cost, format_price, marginal_prices};

const ENTITY: &str = "markets";
const ORDERS: &str = "orders";

async fn load(conn: &mut SqliteConnection, address: &str) -> IndexerResult<Option<MarketRecord>> {
    sqlx::query_as::<_, MarketRecord>("SELECT * FROM markets WHERE address = ?")
        .bind(address)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("Failed to load market"))
}

/// The market at `field` of `key`; a validation error while applying, an
/// integrity error while rolling back.
async fn require(
    conn: &mut SqliteConnection,
    key: &EntityKey,
    field: &str,
    apply: Option<&DecodedEvent>,
) -> IndexerResult<MarketRecord> {
    let address = address_key(&key.address(field)?);
    load(conn, &address).await?.ok_or_else(|| match apply {
        Some(event) => {
            IndexerError::validation(format!("{} on unknown market {address}", event.name))
        }
        None => IndexerError::entity_not_found(ENTITY, key.to_string()),
    })
}

/// `StandardMarketCreation`: stage 0, one zero per outcome of the traded event.
pub async fn create(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    block: BlockInfo,
) -> IndexerResult<()> {
    ensure_absent(conn, ENTITY, key).await?;
    let event_contract = address_key(&event.address_param("eventContract")?);
    let Some(contract) = events::load(conn, &event_contract).await? else {
        return Err(IndexerError::validation(format!(
            "{} references unknown event contract {event_contract}",
            event.name
        )));
    };
    let outcomes = usize::try_from(contract.outcome_count).unwrap_or_default();
    let fee = i64::try_from(event.index("fee")?)
        .map_err(|_| IndexerError::validation(format!("{} fee out of range", event.name)))?;

    sqlx::query(
        r"
        INSERT INTO markets (
            address, factory, creator, event, market_maker, fee, net_outcome_tokens_sold,
            stage, creation_block, creation_timestamp
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(address_key(&key.primary_address()?))
    .bind(address_key(&event.address))
    .bind(address_key(&event.address_param("creator")?))
    .bind(&event_contract)
    .bind(address_key(&event.address_param("marketMaker")?))
    .bind(fee)
    .bind(encode_amounts(&vec![BigInt::zero(); outcomes]))
    .bind(MarketStage::Created.as_i64())
    .bind(sql_int(block.number))
    .bind(sql_int(block.timestamp))
    .execute(&mut *conn)
    .await
    .map_err(insert_error(ENTITY, key))?;

    debug!(market = %key, outcomes, fee, "Market created");
    Ok(())
}

/// Undo `StandardMarketCreation`.
pub async fn delete(conn: &mut SqliteConnection, key: &EntityKey) -> IndexerResult<()> {
    let deleted = sqlx::query("DELETE FROM markets WHERE address = ?")
        .bind(address_key(&key.primary_address()?))
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to delete market"))?
        .rows_affected();

    if deleted == 0 {
        return Err(IndexerError::entity_not_found(ENTITY, key.to_string()));
    }
    Ok(())
}

async fn set_stage(
    conn: &mut SqliteConnection,
    market: &MarketRecord,
    stage: MarketStage,
    funding: Option<String>,
) -> IndexerResult<()> {
    sqlx::query("UPDATE markets SET stage = ?, funding = ? WHERE address = ?")
        .bind(stage.as_i64())
        .bind(funding)
        .bind(&market.address)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to update market stage"))?;
    Ok(())
}

/// `MarketFunding`: funded stage and funding; undone to the created stage
/// without funding.
pub async fn fund(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    undo: bool,
) -> IndexerResult<()> {
    let market = require(conn, key, super::identity::PRIMARY_KEY, (!undo).then_some(event)).await?;
    if undo {
        return set_stage(conn, &market, MarketStage::Created, None).await;
    }
    let funding = event.int("funding")?;
    if !funding.is_positive() {
        return Err(IndexerError::validation(format!("Market {key} funded with {funding}")));
    }
    set_stage(conn, &market, MarketStage::Funded, Some(funding.to_string())).await
}

/// `MarketClosing`, undone to the funded stage.
pub async fn close(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    undo: bool,
) -> IndexerResult<()> {
    let market = require(conn, key, super::identity::PRIMARY_KEY, (!undo).then_some(event)).await?;
    let stage = if undo { MarketStage::Funded } else { MarketStage::Closed };
    set_stage(conn, &market, stage, market.funding.clone()).await
}

/// `FeeWithdrawal`: withdrawn fees grow by `fees`.
pub async fn withdraw_fees(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    undo: bool,
) -> IndexerResult<()> {
    let market = require(conn, key, super::identity::PRIMARY_KEY, (!undo).then_some(event)).await?;
    let fees = event.int("fees")?;
    let withdrawn = parse_amount(&market.withdrawn_fees)?;
    let withdrawn = if undo { withdrawn - fees } else { withdrawn + fees };

    sqlx::query("UPDATE markets SET withdrawn_fees = ? WHERE address = ?")
        .bind(withdrawn.to_string())
        .bind(&market.address)
        .execute(&mut *conn)
        .await
        .map_err(db_error("Failed to update withdrawn fees"))?;
    Ok(())
}

// ==================== TRADE OPERATIONS ====================

/// Amounts of one trade, normalised across the three trade events.
struct Trade {
    order_type: OrderType,
    index: usize,
    count: BigInt,
    /// `cost` for buys and short sells, `profit` for sells
    amount: BigInt,
    fees: BigInt,
}

impl Trade {
    fn from_event(event: &DecodedEvent, order_type: OrderType) -> IndexerResult<Self> {
        let (amount, fees) = match order_type {
            OrderType::Buy => (
                event.int("outcomeTokenCost")?.clone(),
                event.int("marketFees")?.clone(),
            ),
            OrderType::Sell => (
                event.int("outcomeTokenProfit")?.clone(),
                event.int("marketFees")?.clone(),
            ),
            OrderType::ShortSell => (event.int("cost")?.clone(), BigInt::zero()),
        };
        Ok(Self {
            order_type,
            index: event.index("outcomeTokenIndex")?,
            count: event.int("outcomeTokenCount")?.clone(),
            amount,
            fees,
        })
    }

    /// Change to the net sold vector (negated on undo).
    fn apply_to(&self, net_sold: &mut [BigInt], undo: bool) {
        let count = if undo { -&self.count } else { self.count.clone() };
        match self.order_type {
            OrderType::Buy => net_sold[self.index] += &count,
            OrderType::Sell => net_sold[self.index] -= &count,
            OrderType::ShortSell => {
                for (j, sold) in net_sold.iter_mut().enumerate() {
                    if j != self.index {
                        *sold += &count;
                    }
                }
            }
        }
    }

    /// Stored `(cost, profit)`: buys pay fees on top, sells receive profit net of fees.
    fn cost_and_profit(&self) -> (Option<String>, Option<String>) {
        match self.order_type {
            OrderType::Buy => (Some((&self.amount + &self.fees).to_string()), None),
            OrderType::Sell => (None, Some((&self.amount - &self.fees).to_string())),
            OrderType::ShortSell => (Some(self.amount.to_string()), None),
        }
    }
}

/// Marginal prices with 4 decimals, empty when the market cannot be priced.
fn price_snapshot(net_sold: &[BigInt], funding: Option<&BigInt>) -> IndexerResult<Vec<String>> {
    match funding {
        Some(funding) if funding.is_positive() && net_sold.len() >= 2 => {
            Ok(marginal_prices(net_sold, funding)?.iter().map(format_price).collect())
        }
        _ => Ok(Vec::new()),
    }
}

async fn update_aggregates(
    conn: &mut SqliteConnection,
    market: &MarketRecord,
    net_sold: &[BigInt],
    trade: &Trade,
    undo: bool,
) -> IndexerResult<()> {
    let (fees, volume) = if undo {
        (-&trade.fees, -&trade.amount)
    } else {
        (trade.fees.clone(), trade.amount.clone())
    };
    let collected = parse_amount(&market.collected_fees)? + fees;
    let traded = parse_amount(&market.trading_volume)? + volume;

    sqlx::query(
        "UPDATE markets SET net_outcome_tokens_sold = ?, collected_fees = ?, trading_volume = ? \
         WHERE address = ?",
    )
    .bind(encode_amounts(net_sold))
    .bind(collected.to_string())
    .bind(traded.to_string())
    .bind(&market.address)
    .execute(&mut *conn)
    .await
    .map_err(db_error("Failed to update market aggregates"))?;
    Ok(())
}

/// `OutcomeTokenPurchase`, `OutcomeTokenSale` and `OutcomeTokenShortSale`.
pub async fn trade(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    block: BlockInfo,
    order_type: OrderType,
) -> IndexerResult<()> {
    let market = require(conn, key, "market", Some(event)).await?;
    let trade = Trade::from_event(event, order_type)?;
    let mut net_sold = market.net_sold()?;
    if trade.index >= net_sold.len() {
        return Err(IndexerError::validation(format!(
            "{} outcome index {} out of range for market {} with {} outcomes",
            event.name,
            trade.index,
            market.address,
            net_sold.len()
        )));
    }

    let funding = market.funding_amount()?;
    if order_type == OrderType::Buy {
        if let Some(funding) = funding.as_ref().filter(|f| f.is_positive() && net_sold.len() >= 2) {
            match calc_cost(&net_sold, funding, trade.index, &trade.count) {
                Ok(expected) if expected != trade.amount => debug!(
                    market = %market.address,
                    %expected,
                    reported = %trade.amount,
                    "Reported purchase cost differs from LMSR cost"
                ),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        market = %market.address,
                        error = %e,
                        "Could not recompute purchase cost"
                    );
                }
            }
        }
    }

    trade.apply_to(&mut net_sold, false);
    let prices = price_snapshot(&net_sold, funding.as_ref())?;
    let (cost, profit) = trade.cost_and_profit();

    sqlx::query(
        r"
        INSERT INTO orders (
            market, sender, order_type, outcome_token_index, outcome_token_count, cost, profit,
            fees, marginal_prices, transaction_hash, log_index, creation_block, creation_timestamp
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&market.address)
    .bind(address_key(&key.address("sender")?))
    .bind(order_type.as_str())
    .bind(i64::try_from(trade.index).unwrap_or(i64::MAX))
    .bind(trade.count.to_string())
    .bind(cost)
    .bind(profit)
    .bind(trade.fees.to_string())
    .bind(serde_json::to_string(&prices).unwrap_or_else(|_| "[]".to_string()))
    .bind(hash_key(&event.transaction_hash))
    .bind(sql_int(event.log_index))
    .bind(sql_int(block.number))
    .bind(sql_int(block.timestamp))
    .execute(&mut *conn)
    .await
    .map_err(insert_error(ORDERS, key))?;

    update_aggregates(conn, &market, &net_sold, &trade, false).await?;
    debug!(
        market = %market.address,
        order_type = order_type.as_str(),
        index = trade.index,
        count = %trade.count,
        prices = ?prices,
        "Order recorded"
    );
    Ok(())
}

/// Undo a trade: delete its order and restore the market aggregates.
pub async fn undo_trade(
    conn: &mut SqliteConnection,
    event: &DecodedEvent,
    key: &EntityKey,
    order_type: OrderType,
) -> IndexerResult<()> {
    let market = require(conn, key, "market", None).await?;
    let trade = Trade::from_event(event, order_type)?;

    let block = i64::try_from(key.int("creation_block")?)
        .map_err(|_| IndexerError::validation(format!("Order key {key} has an invalid block")))?;
    let log_index = i64::try_from(key.int("log_index")?)
        .map_err(|_| {
            IndexerError::validation(format!("Order key {key} has an invalid log index"))
        })?;

    let deleted = sqlx::query(
        "DELETE FROM orders \
         WHERE market = ? AND sender = ? AND creation_block = ? AND log_index = ?",
    )
    .bind(&market.address)
    .bind(address_key(&key.address("sender")?))
    .bind(block)
    .bind(log_index)
    .execute(&mut *conn)
    .await
    .map_err(db_error("Failed to delete order"))?
    .rows_affected();

    if deleted == 0 {
        return Err(IndexerError::entity_not_found(ORDERS, key.to_string()));
    }

    let mut net_sold = market.net_sold()?;
    if trade.index >= net_sold.len() {
        return Err(IndexerError::state(
            format!("Order {key} refers to outcome {} beyond the market", trade.index),
            None,
        ));
    }
    trade.apply_to(&mut net_sold, true);
    update_aggregates(conn, &market, &net_sold, &trade, true).await
}
