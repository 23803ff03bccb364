//! Persistence for `trades`. `exchange_order_id` carries a UNIQUE
//! constraint so a WS-duplicate racing a REST reconciliation can never
//! produce two rows for the same fill (spec.md §8).

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{MarketType, Side, Trade};
use crate::error::RepositoryError;
use crate::repository::Tx;

pub struct TradeRepository;

impl TradeRepository {
    /// Returns `Ok(None)` if a row for this `exchange_order_id` already
    /// existed — the caller should treat that as the idempotent-success
    /// case, not an error.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_if_absent(
        tx: &mut Tx<'_>,
        strategy_account_id: Uuid,
        exchange_order_id: &str,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        order_price: Option<Decimal>,
        average_price: Decimal,
        fee: Decimal,
        realized_pnl: Decimal,
        is_entry: bool,
        market_type: MarketType,
    ) -> Result<Option<Trade>, RepositoryError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                id, strategy_account_id, exchange_order_id, symbol, side, quantity,
                order_price, average_price, fee, realized_pnl, is_entry, timestamp, market_type
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            ON CONFLICT (exchange_order_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(strategy_account_id)
        .bind(exchange_order_id)
        .bind(symbol)
        .bind(side_str(side))
        .bind(quantity)
        .bind(order_price)
        .bind(average_price)
        .bind(fee)
        .bind(realized_pnl)
        .bind(is_entry)
        .bind(now)
        .bind(market_type_str(market_type))
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(Trade {
            id,
            strategy_account_id,
            exchange_order_id: exchange_order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            order_price,
            average_price,
            fee,
            realized_pnl,
            is_entry,
            timestamp: now,
            market_type,
        }))
    }

    pub async fn exists(tx: &mut Tx<'_>, exchange_order_id: &str) -> Result<bool, RepositoryError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM trades WHERE exchange_order_id = $1")
                .bind(exchange_order_id)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(row.is_some())
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn market_type_str(market_type: MarketType) -> &'static str {
    match market_type {
        MarketType::Spot => "SPOT",
        MarketType::Futures => "FUTURES",
    }
}
