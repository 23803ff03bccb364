//! PositionReconciler (C9) — the sole mutator of `StrategyPosition`
//! (spec.md §4.9). Every write happens under `SELECT … FOR UPDATE` inside
//! the caller's transaction; this type never opens its own.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Side, StrategyPosition};
use crate::error::RepositoryError;
use crate::repository::Tx;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillOutcome {
    pub position: StrategyPosition,
    pub realized_pnl: Decimal,
    pub is_entry: bool,
}

pub struct PositionReconciler;

impl PositionReconciler {
    /// Locks the position row, applies the signed fill, and returns the
    /// resulting position plus any PnL realized by this fill (spec.md
    /// §4.9). Does not persist — callers write the returned position back
    /// inside the same transaction that `load_for_update` was issued in.
    pub async fn load_for_update(
        tx: &mut Tx<'_>,
        strategy_account_id: Uuid,
        symbol: &str,
    ) -> Result<StrategyPosition, RepositoryError> {
        let row: Option<PositionRow> = sqlx::query_as(
            r#"
            SELECT strategy_account_id, symbol, quantity, entry_price
            FROM strategy_positions
            WHERE strategy_account_id = $1 AND symbol = $2
            FOR UPDATE
            "#,
        )
        .bind(strategy_account_id)
        .bind(symbol)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(match row {
            Some(r) => r.into(),
            None => StrategyPosition::flat(strategy_account_id, symbol),
        })
    }

    pub async fn save(tx: &mut Tx<'_>, position: &StrategyPosition) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO strategy_positions (strategy_account_id, symbol, quantity, entry_price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (strategy_account_id, symbol)
            DO UPDATE SET quantity = EXCLUDED.quantity, entry_price = EXCLUDED.entry_price
            "#,
        )
        .bind(position.strategy_account_id)
        .bind(&position.symbol)
        .bind(position.quantity)
        .bind(position.entry_price)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Pure application of a signed fill to a position (spec.md §4.9 rules).
    /// Split out from `load_for_update`/`save` so the three cases — add,
    /// reduce, flip — are unit-testable without a database.
    pub fn apply_fill(
        position: &StrategyPosition,
        side: Side,
        fill_qty: Decimal,
        fill_price: Decimal,
    ) -> FillOutcome {
        let signed_fill = match side {
            Side::Buy => fill_qty,
            Side::Sell => -fill_qty,
        };

        if position.is_flat() || position.sign() == signed_fill.signum().to_i32() {
            // Same direction (or opening from flat): weighted-average entry.
            let existing_notional = position.quantity.abs() * position.entry_price;
            let new_notional = signed_fill.abs() * fill_price;
            let new_quantity = position.quantity + signed_fill;
            let new_entry = if new_quantity.is_zero() {
                Decimal::ZERO
            } else {
                (existing_notional + new_notional) / new_quantity.abs()
            };
            return FillOutcome {
                position: StrategyPosition {
                    strategy_account_id: position.strategy_account_id,
                    symbol: position.symbol.clone(),
                    quantity: new_quantity,
                    entry_price: new_entry,
                },
                realized_pnl: Decimal::ZERO,
                is_entry: true,
            };
        }

        // Opposite direction: either a reduce or a flip.
        let closing_qty = signed_fill.abs().min(position.quantity.abs());
        let direction_sign = Decimal::from(position.sign());
        let realized_pnl = closing_qty * (fill_price - position.entry_price) * direction_sign;

        let new_quantity = position.quantity + signed_fill;

        if new_quantity.signum() == position.quantity.signum() || new_quantity.is_zero() {
            // Reduce: entry price unchanged.
            FillOutcome {
                position: StrategyPosition {
                    strategy_account_id: position.strategy_account_id,
                    symbol: position.symbol.clone(),
                    quantity: new_quantity,
                    entry_price: if new_quantity.is_zero() {
                        Decimal::ZERO
                    } else {
                        position.entry_price
                    },
                },
                realized_pnl,
                is_entry: false,
            }
        } else {
            // Flip: residual quantity re-entered at the fill price.
            FillOutcome {
                position: StrategyPosition {
                    strategy_account_id: position.strategy_account_id,
                    symbol: position.symbol.clone(),
                    quantity: new_quantity,
                    entry_price: fill_price,
                },
                realized_pnl,
                is_entry: true,
            }
        }
    }
}

trait SignumToI32 {
    fn to_i32(self) -> i32;
}

impl SignumToI32 for Decimal {
    fn to_i32(self) -> i32 {
        if self.is_sign_positive() && !self.is_zero() {
            1
        } else if self.is_sign_negative() {
            -1
        } else {
            0
        }
    }
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    strategy_account_id: Uuid,
    symbol: String,
    quantity: Decimal,
    entry_price: Decimal,
}

impl From<PositionRow> for StrategyPosition {
    fn from(row: PositionRow) -> Self {
        StrategyPosition {
            strategy_account_id: row.strategy_account_id,
            symbol: row.symbol,
            quantity: row.quantity,
            entry_price: row.entry_price,
        }
    }
}
