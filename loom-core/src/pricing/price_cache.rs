//! PriceCache (C3) — TTL-bounded last-price store (spec.md §4.3).
//!
//! The FX rate lookup is deliberately its own method that never falls
//! back to a stale value: spec.md is explicit that capital math downstream
//! is money-sensitive and must fail hard rather than silently use a
//! synthesized number (spec.md §7, §8 "FX fail-closed").

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::error;

use crate::domain::MarketType;
use crate::error::PriceCacheError;

#[derive(Debug, Clone, Copy)]
struct PricePoint {
    price: Decimal,
    fetched_at: Instant,
}

type PriceKey = (String, MarketType, String);

pub struct PriceCache {
    prices: DashMap<PriceKey, PricePoint>,
    usdt_krw: DashMap<(), PricePoint>,
    ttl: Duration,
    stale_warning_threshold: Duration,
}

impl PriceCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            prices: DashMap::new(),
            usdt_krw: DashMap::new(),
            ttl: Duration::from_secs(ttl_seconds),
            stale_warning_threshold: Duration::from_secs(3600),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(30)
    }

    pub fn update_price(&self, exchange: &str, market_type: MarketType, symbol: &str, price: Decimal) {
        self.prices.insert(
            (exchange.to_string(), market_type, symbol.to_string()),
            PricePoint {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn update_usdt_krw_rate(&self, rate: Decimal) {
        self.usdt_krw.insert(
            (),
            PricePoint {
                price: rate,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Returns the cached value iff fresher than the configured TTL;
    /// otherwise the caller is expected to trigger a best-effort batch
    /// refresh and retry (spec.md §4.3).
    pub fn get_price(
        &self,
        exchange: &str,
        market_type: MarketType,
        symbol: &str,
    ) -> Result<Decimal, PriceCacheError> {
        let key = (exchange.to_string(), market_type, symbol.to_string());
        match self.prices.get(&key) {
            Some(point) if point.fetched_at.elapsed() < self.ttl => Ok(point.price),
            _ => Err(PriceCacheError::NoCachedPrice {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
            }),
        }
    }

    /// Must fail hard rather than return stale or synthesized data
    /// (spec.md §4.3, §7, §8).
    pub fn get_usdt_krw_rate(&self) -> Result<Decimal, PriceCacheError> {
        match self.usdt_krw.get(&()) {
            Some(point) if point.fetched_at.elapsed() < self.ttl => Ok(point.price),
            _ => Err(PriceCacheError::ExchangeRateUnavailable),
        }
    }

    /// Scheduled sweep: entries older than one hour emit a CRITICAL log
    /// even if unused (spec.md §4.3), since a stale precision cache is a
    /// silent-failure risk worth surfacing before anyone reads it.
    pub fn sweep_stale(&self) {
        for entry in self.prices.iter() {
            if entry.fetched_at.elapsed() > self.stale_warning_threshold {
                let (exchange, market_type, symbol) = entry.key();
                error!(
                    exchange, symbol, ?market_type,
                    age_secs = entry.fetched_at.elapsed().as_secs(),
                    "CRITICAL: price cache entry older than 1 hour"
                );
            }
        }
        if let Some(point) = self.usdt_krw.get(&()) {
            if point.fetched_at.elapsed() > self.stale_warning_threshold {
                error!(
                    age_secs = point.fetched_at.elapsed().as_secs(),
                    "CRITICAL: USDT/KRW rate older than 1 hour"
                );
            }
        }
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fresh_price_is_returned() {
        let cache = PriceCache::new(30);
        cache.update_price("bybit", MarketType::Spot, "BTC/USDT", dec!(50000));
        assert_eq!(
            cache.get_price("bybit", MarketType::Spot, "BTC/USDT").unwrap(),
            dec!(50000)
        );
    }

    #[test]
    fn stale_price_errors() {
        let cache = PriceCache::new(0);
        cache.update_price("bybit", MarketType::Spot, "BTC/USDT", dec!(50000));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_price("bybit", MarketType::Spot, "BTC/USDT").is_err());
    }

    #[test]
    fn fx_rate_unavailable_is_explicit_error_never_stale_default() {
        let cache = PriceCache::new(30);
        let err = cache.get_usdt_krw_rate().unwrap_err();
        assert!(matches!(err, PriceCacheError::ExchangeRateUnavailable));
    }

    #[test]
    fn fx_rate_also_expires() {
        let cache = PriceCache::new(0);
        cache.update_usdt_krw_rate(dec!(1330));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            cache.get_usdt_krw_rate().unwrap_err(),
            PriceCacheError::ExchangeRateUnavailable
        ));
    }
}
