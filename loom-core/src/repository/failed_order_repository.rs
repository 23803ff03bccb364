//! Persistence for `failed_orders`, the durable retry record shared by
//! C5's promotion-rejection path and C7's `FailedOrderManager` (spec.md
//! §4.5, §4.7). `order_params` is stored as JSON since it's only ever
//! replayed whole, never queried by field.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{FailedOrder, FailedOrderStatus, OperationType, OrderParams};
use crate::error::RepositoryError;
use crate::repository::Tx;
use crate::retry::sanitize::sanitize_exchange_error;

pub struct FailedOrderRepository;

impl FailedOrderRepository {
    pub async fn insert(
        tx: &mut Tx<'_>,
        operation_type: OperationType,
        strategy_account_id: Uuid,
        order_params: OrderParams,
        reason: &str,
        exchange_error: Option<&str>,
        original_order_id: Option<Uuid>,
    ) -> Result<FailedOrder, RepositoryError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let params_json = serde_json::to_value(&order_params).unwrap_or(Value::Null);

        sqlx::query(
            r#"
            INSERT INTO failed_orders (
                id, operation_type, strategy_account_id, symbol, side, order_type,
                quantity, price, stop_price, market_type, reason, exchange_error,
                order_params, original_order_id, retry_count, status, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 0,
                'pending_retry', $15
            )
            "#,
        )
        .bind(id)
        .bind(operation_type_str(operation_type))
        .bind(strategy_account_id)
        .bind(&order_params.symbol)
        .bind(side_str(order_params.side))
        .bind(order_type_str(order_params.order_type))
        .bind(order_params.quantity)
        .bind(order_params.price)
        .bind(order_params.stop_price)
        .bind(market_type_str(order_params.market_type))
        .bind(reason)
        .bind(exchange_error.map(sanitize_exchange_error))
        .bind(&params_json)
        .bind(original_order_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(FailedOrder {
            id,
            operation_type,
            strategy_account_id,
            symbol: order_params.symbol.clone(),
            side: order_params.side,
            order_type: order_params.order_type,
            quantity: order_params.quantity,
            price: order_params.price,
            stop_price: order_params.stop_price,
            market_type: order_params.market_type,
            reason: reason.to_string(),
            exchange_error: exchange_error.map(sanitize_exchange_error),
            order_params,
            original_order_id,
            retry_count: 0,
            status: FailedOrderStatus::PendingRetry,
            created_at: now,
        })
    }

    /// `FOR UPDATE SKIP LOCKED` claim of pending retries (spec.md §4.7).
    /// Unlike `cancel_queue`, `failed_orders` has no `next_retry_at` column
    /// — the worker's own poll interval is the backoff.
    pub async fn claim_due(tx: &mut Tx<'_>, limit: i64) -> Result<Vec<FailedOrder>, RepositoryError> {
        let rows: Vec<FailedOrderRow> = sqlx::query_as(
            r#"
            SELECT id, operation_type, strategy_account_id, symbol, side, order_type,
                   quantity, price, stop_price, market_type, reason, exchange_error,
                   order_params, original_order_id, retry_count, status, created_at
            FROM failed_orders
            WHERE status = 'pending_retry'
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn increment_retry(
        tx: &mut Tx<'_>,
        id: Uuid,
        exchange_error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"UPDATE failed_orders SET retry_count = retry_count + 1, exchange_error = $2 WHERE id = $1"#,
        )
        .bind(id)
        .bind(exchange_error.map(sanitize_exchange_error))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(tx: &mut Tx<'_>, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE failed_orders SET status = 'completed' WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn mark_removed(tx: &mut Tx<'_>, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE failed_orders SET status = 'removed' WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct FailedOrderRow {
    id: Uuid,
    operation_type: String,
    strategy_account_id: Uuid,
    symbol: String,
    side: String,
    order_type: String,
    quantity: rust_decimal::Decimal,
    price: Option<rust_decimal::Decimal>,
    stop_price: Option<rust_decimal::Decimal>,
    market_type: String,
    reason: String,
    exchange_error: Option<String>,
    order_params: Value,
    original_order_id: Option<Uuid>,
    retry_count: i32,
    status: String,
    created_at: chrono::DateTime<Utc>,
}

impl From<FailedOrderRow> for FailedOrder {
    fn from(row: FailedOrderRow) -> Self {
        let order_params: OrderParams = serde_json::from_value(row.order_params).unwrap_or(OrderParams {
            symbol: row.symbol.clone(),
            side: parse_side(&row.side),
            order_type: parse_order_type(&row.order_type),
            quantity: row.quantity,
            price: row.price,
            stop_price: row.stop_price,
            market_type: parse_market_type(&row.market_type),
        });

        FailedOrder {
            id: row.id,
            operation_type: parse_operation_type(&row.operation_type),
            strategy_account_id: row.strategy_account_id,
            symbol: row.symbol,
            side: parse_side(&row.side),
            order_type: parse_order_type(&row.order_type),
            quantity: row.quantity,
            price: row.price,
            stop_price: row.stop_price,
            market_type: parse_market_type(&row.market_type),
            reason: row.reason,
            exchange_error: row.exchange_error,
            order_params,
            original_order_id: row.original_order_id,
            retry_count: row.retry_count,
            status: parse_failed_order_status(&row.status),
            created_at: row.created_at,
        }
    }
}

fn parse_operation_type(raw: &str) -> OperationType {
    match raw {
        "cancel" => OperationType::Cancel,
        _ => OperationType::Create,
    }
}

fn parse_failed_order_status(raw: &str) -> FailedOrderStatus {
    match raw {
        "completed" => FailedOrderStatus::Completed,
        "removed" => FailedOrderStatus::Removed,
        _ => FailedOrderStatus::PendingRetry,
    }
}

fn parse_side(raw: &str) -> crate::domain::Side {
    match raw {
        "SELL" => crate::domain::Side::Sell,
        _ => crate::domain::Side::Buy,
    }
}

fn parse_order_type(raw: &str) -> crate::domain::OrderType {
    match raw {
        "LIMIT" => crate::domain::OrderType::Limit,
        "STOP_MARKET" => crate::domain::OrderType::StopMarket,
        "STOP_LIMIT" => crate::domain::OrderType::StopLimit,
        "BEST_LIMIT" => crate::domain::OrderType::BestLimit,
        _ => crate::domain::OrderType::Market,
    }
}

fn parse_market_type(raw: &str) -> crate::domain::MarketType {
    match raw {
        "FUTURES" => crate::domain::MarketType::Futures,
        _ => crate::domain::MarketType::Spot,
    }
}

fn operation_type_str(op: OperationType) -> &'static str {
    match op {
        OperationType::Create => "create",
        OperationType::Cancel => "cancel",
    }
}

fn side_str(side: crate::domain::Side) -> &'static str {
    match side {
        crate::domain::Side::Buy => "BUY",
        crate::domain::Side::Sell => "SELL",
    }
}

fn order_type_str(order_type: crate::domain::OrderType) -> &'static str {
    match order_type {
        crate::domain::OrderType::Market => "MARKET",
        crate::domain::OrderType::Limit => "LIMIT",
        crate::domain::OrderType::StopMarket => "STOP_MARKET",
        crate::domain::OrderType::StopLimit => "STOP_LIMIT",
        crate::domain::OrderType::BestLimit => "BEST_LIMIT",
    }
}

fn market_type_str(market_type: crate::domain::MarketType) -> &'static str {
    match market_type {
        crate::domain::MarketType::Spot => "SPOT",
        crate::domain::MarketType::Futures => "FUTURES",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_type_round_trips() {
        assert_eq!(operation_type_str(OperationType::Create), "create");
        assert_eq!(operation_type_str(OperationType::Cancel), "cancel");
    }
}
