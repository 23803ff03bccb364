//! SymbolValidator (C2) — in-memory lot/tick/min-notional validation,
//! refreshed on a schedule (spec.md §4.2).
//!
//! Grounded on the teacher's `data::validator::SnapshotValidator`: a small
//! struct wrapping validation rules with a `validate(...) -> Result<_, E>`
//! method, here backed by a `dashmap::DashMap` instead of being stateless
//! since this validator caches exchange metadata rather than validating an
//! already-in-hand snapshot.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::domain::MarketType;
use crate::error::ValidationError;

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_notional: Decimal,
    pub price_precision: u32,
    pub amount_precision: u32,
    /// Whether this exchange's metadata needs periodic refresh (API-based)
    /// or is fixed by rule and never changes.
    pub refreshable: bool,
    pub fetched_at: Instant,
}

#[derive(Debug, Clone)]
pub struct AdjustedOrder {
    pub adjusted_qty: Decimal,
    pub adjusted_price: Option<Decimal>,
}

fn round_down_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).floor() * step
}

/// Cache key: (exchange, symbol, market_type). Exchange/symbol are owned
/// strings rather than the `&'static str` sketch above, since symbols are
/// data, not compile-time constants.
type MapKey = (String, String, MarketType);

/// Per-(exchange, market_type) open-order ceilings (SPEC_FULL.md §3.2
/// `ExchangeLimitTracker`), folded into C2's surface since it is fetched
/// and refreshed the same way as symbol metadata.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeLimits {
    pub max_open_orders: usize,
    pub max_stop_orders: usize,
}

type LimitsKey = (String, MarketType);

pub struct SymbolValidator {
    market_info: DashMap<MapKey, SymbolInfo>,
    exchange_limits: DashMap<LimitsKey, ExchangeLimits>,
}

impl SymbolValidator {
    pub fn new() -> Self {
        Self {
            market_info: DashMap::new(),
            exchange_limits: DashMap::new(),
        }
    }

    pub fn upsert_limits(&self, exchange: impl Into<String>, market_type: MarketType, limits: ExchangeLimits) {
        self.exchange_limits.insert((exchange.into(), market_type), limits);
    }

    /// Fails closed like symbol metadata: an unconfigured (exchange,
    /// market_type) has no known ceiling, so callers must not submit
    /// against it blindly. `None` here means "refresh hasn't happened
    /// yet" and callers should treat the bucket as having zero free slots.
    pub fn limits_for(&self, exchange: &str, market_type: MarketType) -> Option<ExchangeLimits> {
        self.exchange_limits
            .get(&(exchange.to_string(), market_type))
            .map(|r| *r)
    }

    /// Loaded at startup (and on refresh) from each exchange's public
    /// metadata endpoint; the fetch itself is the adapter's concern, this
    /// just stores the result.
    pub fn upsert(
        &self,
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        market_type: MarketType,
        info: SymbolInfo,
    ) {
        self.market_info
            .insert((exchange.into(), symbol.into(), market_type), info);
    }

    pub fn needs_refresh(&self, exchange: &str, symbol: &str, market_type: MarketType, max_age: Duration) -> bool {
        match self.market_info.get(&(exchange.to_string(), symbol.to_string(), market_type)) {
            Some(info) => info.refreshable && info.fetched_at.elapsed() > max_age,
            None => true,
        }
    }

    /// Fail-closed on cache miss (spec.md §4.2: "the core refuses to trade
    /// that symbol").
    pub fn validate_order(
        &self,
        exchange: &str,
        symbol: &str,
        market_type: MarketType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<AdjustedOrder, ValidationError> {
        let key = (exchange.to_string(), symbol.to_string(), market_type);
        let info = self
            .market_info
            .get(&key)
            .ok_or_else(|| ValidationError::UnknownSymbol {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
                market_type,
            })?;

        let adjusted_qty = round_down_to_step(quantity, info.step_size);
        if adjusted_qty < info.min_qty {
            return Err(ValidationError::BelowMinQuantity {
                quantity: adjusted_qty,
                min_qty: info.min_qty,
            });
        }
        if adjusted_qty > info.max_qty {
            return Err(ValidationError::AboveMaxQuantity {
                quantity: adjusted_qty,
                max_qty: info.max_qty,
            });
        }

        let adjusted_price = price.map(|p| round_down_to_step(p, info.tick_size));

        if let Some(p) = adjusted_price {
            let notional = adjusted_qty * p;
            if notional < info.min_notional {
                return Err(ValidationError::BelowMinNotional {
                    notional,
                    min_notional: info.min_notional,
                });
            }
        }

        Ok(AdjustedOrder {
            adjusted_qty,
            adjusted_price,
        })
    }
}

impl Default for SymbolValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_info() -> SymbolInfo {
        SymbolInfo {
            min_qty: dec!(0.001),
            max_qty: dec!(1000),
            step_size: dec!(0.001),
            tick_size: dec!(0.01),
            min_notional: dec!(10),
            price_precision: 2,
            amount_precision: 3,
            refreshable: true,
            fetched_at: Instant::now(),
        }
    }

    #[test]
    fn unknown_symbol_fails_closed() {
        let validator = SymbolValidator::new();
        let err = validator
            .validate_order("bybit", "BTC/USDT", MarketType::Spot, dec!(1), None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownSymbol { .. }));
    }

    #[test]
    fn rounds_down_to_step_and_tick() {
        let validator = SymbolValidator::new();
        validator.upsert("bybit", "BTC/USDT", MarketType::Spot, sample_info());

        let adjusted = validator
            .validate_order("bybit", "BTC/USDT", MarketType::Spot, dec!(0.0019), Some(dec!(50000.009)))
            .unwrap();

        assert_eq!(adjusted.adjusted_qty, dec!(0.001));
        assert_eq!(adjusted.adjusted_price, Some(dec!(50000.00)));
    }

    #[test]
    fn rejects_below_min_notional() {
        let validator = SymbolValidator::new();
        validator.upsert("bybit", "BTC/USDT", MarketType::Spot, sample_info());

        let err = validator
            .validate_order("bybit", "BTC/USDT", MarketType::Spot, dec!(0.001), Some(dec!(1)))
            .unwrap_err();
        assert!(matches!(err, ValidationError::BelowMinNotional { .. }));
    }

    #[test]
    fn rejects_below_min_quantity_after_rounding() {
        let validator = SymbolValidator::new();
        validator.upsert("bybit", "BTC/USDT", MarketType::Spot, sample_info());

        let err = validator
            .validate_order("bybit", "BTC/USDT", MarketType::Spot, dec!(0.0004), None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::BelowMinQuantity { .. }));
    }
}
