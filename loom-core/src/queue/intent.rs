//! An intent is the unit C8's fan-out hands to C5: "place something like
//! this for this (account, symbol) bucket" (spec.md §4.5).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{MarketType, OrderType, Side};

#[derive(Debug, Clone)]
pub struct Intent {
    pub strategy_account_id: Uuid,
    pub account_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub quantity: Decimal,
    pub market_type: MarketType,
    pub webhook_received_at: DateTime<Utc>,
    /// Lower = more urgent.
    pub priority: i32,
    pub sort_price: Decimal,
}

/// The bucket's limit policy. `max_open_orders` and `max_stop_orders` are
/// enforced as two independent ceilings, never collapsed into one (spec.md
/// §4.5 Invariant 1, §8 "count(OpenOrder) ≤ per_symbol_limit ∧
/// count(OpenOrder where type is STOP) ≤ stop_limit"): a stop order counts
/// against both, a non-stop order only against `max_open_orders`, the same
/// `current_total`/`current_stop` split `exchange_limit_tracker.py`'s
/// `count_active_orders` keeps.
#[derive(Debug, Clone, Copy)]
pub struct BucketLimits {
    pub max_open_orders: usize,
    pub max_stop_orders: usize,
}

impl BucketLimits {
    /// `K = min(per_symbol_limit, per_account_limit_share)` applied to each
    /// ceiling separately.
    pub fn total_top_k(self) -> usize {
        self.max_open_orders
    }

    pub fn stop_top_k(self) -> usize {
        self.max_stop_orders.min(self.max_open_orders)
    }

    /// Builds the effective limits for a bucket from the exchange's
    /// published ceilings (C2's `ExchangeLimits`) and the binding's
    /// `max_symbols` share of it (spec.md §3 `StrategyAccount`, §4.5
    /// Invariant 1), capping both the general and the stop ceiling by the
    /// same per-account share.
    pub fn from_exchange_limits(
        limits: crate::validation::ExchangeLimits,
        per_account_limit_share: usize,
    ) -> Self {
        Self {
            max_open_orders: limits.max_open_orders.min(per_account_limit_share),
            max_stop_orders: limits.max_stop_orders.min(per_account_limit_share),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A free slot existed; the order was submitted and an `OpenOrder`
    /// row written.
    Submitted(crate::domain::OpenOrder),
    /// No slot was free; a `PendingOrder` row was written instead.
    Queued(crate::domain::PendingOrder),
}
