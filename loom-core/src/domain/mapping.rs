//! OrderMapping cache — resolves a fill event that races ahead of DB
//! persistence to the `{account, exchange, market_type, symbol}` it
//! belongs to, without hitting the database.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use super::order::MarketType;

#[derive(Debug, Clone)]
pub struct OrderMappingEntry {
    pub account_id: Uuid,
    pub exchange: String,
    pub market_type: MarketType,
    pub symbol: String,
    pub inserted_at: Instant,
}

/// TTL-bounded map keyed by `exchange_order_id`. Registered at order
/// creation (C5), consulted when C6 receives a fill event for an
/// `exchange_order_id` it cannot yet find in the DB.
pub struct OrderMappingCache {
    entries: DashMap<String, OrderMappingEntry>,
    ttl: Duration,
}

impl OrderMappingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(15 * 60))
    }

    pub fn register(
        &self,
        exchange_order_id: impl Into<String>,
        account_id: Uuid,
        exchange: impl Into<String>,
        market_type: MarketType,
        symbol: impl Into<String>,
    ) {
        self.entries.insert(
            exchange_order_id.into(),
            OrderMappingEntry {
                account_id,
                exchange: exchange.into(),
                market_type,
                symbol: symbol.into(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Returns the mapping iff present and not expired; expired entries
    /// are lazily evicted on lookup.
    pub fn resolve(&self, exchange_order_id: &str) -> Option<OrderMappingEntry> {
        let Some(entry) = self.entries.get(exchange_order_id) else {
            return None;
        };
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(exchange_order_id);
            return None;
        }
        Some(entry.clone())
    }

    pub fn remove(&self, exchange_order_id: &str) {
        self.entries.remove(exchange_order_id);
    }

    /// Scheduled sweep: drop anything past TTL. Cheap enough to run on a
    /// timer rather than on every lookup.
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| v.inserted_at.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
