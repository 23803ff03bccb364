//! Order-related domain types shared by every component that touches an
//! order's lifecycle: [`OpenOrder`] (live on the exchange),
//! [`PendingOrder`] (queued, waiting for a slot) and the small enums that
//! describe their shape.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Exchange order type. `BestLimit` tracks the book and reprices like a
/// market order while staying a maker order where the exchange supports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
    BestLimit,
}

impl OrderType {
    pub fn is_stop(self) -> bool {
        matches!(self, OrderType::StopMarket | OrderType::StopLimit)
    }
}

/// SPOT vs FUTURES (or whatever else a given exchange distinguishes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketType {
    Spot,
    Futures,
}

/// Lifecycle status of an [`OpenOrder`] row.
///
/// `Filled`, `Cancelled`, `Expired` and `Failed` are terminal: once an order
/// reaches one of these, [`OrderRepository::transition`](crate::repository::OrderRepository::transition)
/// refuses any further transition out of it (spec.md §4.4 / GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    Cancelling,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired | OrderStatus::Failed
        )
    }
}

/// A live order: its row exists and `exchange_order_id` exists on the
/// exchange. See spec.md §3 for the full invariant list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: Uuid,
    pub strategy_account_id: Uuid,
    pub account_id: Uuid,
    pub exchange_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub market_type: MarketType,
    /// The intent's priority, carried over from the `PendingOrder` it was
    /// promoted from (or the original intent, if submitted immediately).
    /// Needed so rebalance can rank a live order against queued rows by
    /// its real priority instead of treating every live order as equally
    /// urgent (spec.md §4.5 Invariant 2).
    pub priority: i32,
    /// Tie-break after priority, same field `PendingOrder` carries.
    pub sort_price: Decimal,
    /// NOT NULL, preserved across every Pending<->Open conversion — losing
    /// it on a promotion once caused an infinite cancel/create loop.
    pub webhook_received_at: DateTime<Utc>,
    pub is_processing: bool,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub cancel_attempted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Queueing carrier used while a bucket has no free exchange slot. Ordering
/// of pending rows within a bucket is defined by [`crate::queue::Intent`];
/// this struct is the persisted counterpart that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: Uuid,
    pub account_id: Uuid,
    pub strategy_account_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub quantity: Decimal,
    /// Lower = more urgent.
    pub priority: i32,
    /// Tie-break after priority.
    pub sort_price: Decimal,
    pub market_type: MarketType,
    /// NOT NULL — preserved across every Pending<->Open conversion
    /// (spec.md §4.5 Invariant 2, §8 testable property).
    pub webhook_received_at: DateTime<Utc>,
    pub retry_count: i32,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_match_glossary() {
        for s in [OrderStatus::Filled, OrderStatus::Cancelled, OrderStatus::Expired, OrderStatus::Failed] {
            assert!(s.is_terminal());
        }
        for s in [OrderStatus::Open, OrderStatus::Cancelling, OrderStatus::PartiallyFilled] {
            assert!(!s.is_terminal());
        }
    }

    #[test]
    fn stop_order_types() {
        assert!(OrderType::StopMarket.is_stop());
        assert!(OrderType::StopLimit.is_stop());
        assert!(!OrderType::Limit.is_stop());
        assert!(!OrderType::BestLimit.is_stop());
    }
}
