//! Trade and StrategyPosition — the entities [`crate::position::PositionReconciler`]
//! (C9) exclusively mutates.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{MarketType, Side};

/// A realized fill. `exchange_order_id` is UNIQUE — enforced in the schema
/// so that WS-duplicate + REST-confirmation races can never produce two
/// rows for the same fill (spec.md §8 testable property).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub strategy_account_id: Uuid,
    pub exchange_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub order_price: Option<Decimal>,
    pub average_price: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub is_entry: bool,
    pub timestamp: DateTime<Utc>,
    pub market_type: MarketType,
}

/// Signed net position per (strategy_account, symbol). Rows with
/// `quantity == 0` are retained (capital allocator's `has_open_positions`
/// check reads them) — deletion is separate housekeeping, not this
/// crate's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPosition {
    pub strategy_account_id: Uuid,
    pub symbol: String,
    /// Positive = long, negative = short, zero = flat.
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

impl StrategyPosition {
    pub fn flat(strategy_account_id: Uuid, symbol: impl Into<String>) -> Self {
        Self {
            strategy_account_id,
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn sign(&self) -> i32 {
        if self.quantity.is_sign_positive() && !self.quantity.is_zero() {
            1
        } else if self.quantity.is_sign_negative() {
            -1
        } else {
            0
        }
    }
}
