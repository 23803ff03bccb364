//! FailedOrder — the durable retry record for both create- and
//! cancel-failures. Mutated exclusively by
//! [`crate::retry::FailedOrderManager`] (C7).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{MarketType, OrderType, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    Cancel,
}

/// `Removed` is terminal and never re-selected for retry (spec.md §3
/// invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedOrderStatus {
    PendingRetry,
    Completed,
    Removed,
}

impl FailedOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FailedOrderStatus::Completed | FailedOrderStatus::Removed)
    }
}

/// The original order parameters, kept structured so a CREATE retry can
/// replay them through the exchange's batch endpoint without
/// reconstructing them from a free-text blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub market_type: MarketType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOrder {
    pub id: Uuid,
    pub operation_type: OperationType,
    pub strategy_account_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub market_type: MarketType,
    pub reason: String,
    /// Sanitized, <= 500 chars (spec.md §7 / §4.7).
    pub exchange_error: Option<String>,
    pub order_params: OrderParams,
    /// Set only for CANCEL operations — the OpenOrder this retry targets.
    pub original_order_id: Option<Uuid>,
    pub retry_count: i32,
    pub status: FailedOrderStatus,
    pub created_at: DateTime<Utc>,
}

impl FailedOrder {
    pub const MAX_RETRIES: i32 = 5;
}
