//! Deterministic in-memory `ExchangeAdapter`, used by integration tests
//! (spec.md §8's seeded scenarios need a reproducible exchange, not a live
//! one) and by `loom-paper`. Every mutating call can be given artificial
//! latency and a rejection rule up front, so a test can drive exact races
//! (e.g. spec.md §8 scenario 2's "fill event arrives before the REST
//! response for order creation").

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use loom_core::domain::{MarketType, OrderStatus, OrderType};
use loom_core::error::ExchangeAdapterError;
use loom_core::exchange::{
    Balance, CreateOrderRequest, ExchangeAdapter, NormalizedOrder, PrivateOrderStream, RawOrderEvent,
};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::broadcast;

/// What a `MockExchangeAdapter` should do when asked to act on a symbol.
#[derive(Debug, Clone, Default)]
pub struct MockExchangeConfig {
    pub exchange_name: String,
    /// Simulated round-trip latency applied to every call.
    pub latency: Duration,
    /// Symbols that always reject with `ExchangeAdapterError::Api`.
    pub reject_symbols: HashSet<String>,
    /// If true, `create_order` fills the order in full immediately and
    /// emits the corresponding private-stream event. If false, the order
    /// stays `Open` until `fill` is called explicitly by a test.
    pub fill_immediately: bool,
}

impl MockExchangeConfig {
    pub fn new(exchange_name: impl Into<String>) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            fill_immediately: true,
            ..Default::default()
        }
    }
}

struct MockOrder {
    normalized: NormalizedOrder,
    symbol: String,
    requested_quantity: Decimal,
    remaining_cancel_failures: u32,
}

/// Shares its order book and event bus across clones — every `Arc` handed
/// to `TradingSystem` and every handle a test keeps refer to the same
/// state, the way a real exchange's account state is shared across
/// connections.
pub struct MockExchangeAdapter {
    config: MockExchangeConfig,
    orders: DashMap<String, MockOrder>,
    next_id: AtomicU64,
    events: broadcast::Sender<RawOrderEvent>,
}

impl MockExchangeAdapter {
    pub fn new(config: MockExchangeConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            config,
            orders: DashMap::new(),
            next_id: AtomicU64::new(1),
            events,
        })
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    /// Test hook: marks a previously-created order filled and emits the
    /// private-stream event a real exchange would push. Used by tests
    /// that set `fill_immediately: false` to control exactly when C6
    /// observes the fill relative to other events.
    pub fn fill(&self, exchange_order_id: &str, average_price: Decimal, fee: Decimal) {
        if let Some(mut entry) = self.orders.get_mut(exchange_order_id) {
            entry.normalized.status = OrderStatus::Filled;
            entry.normalized.filled_quantity = entry.requested_quantity;
            entry.normalized.average_price = Some(average_price);
            entry.normalized.fee = fee;
            let event = RawOrderEvent {
                exchange_order_id: Some(exchange_order_id.to_string()),
                symbol: Some(entry.symbol.clone()),
                raw: json!({ "status": "FILLED" }),
            };
            let _ = self.events.send(event);
        }
    }

    /// Test hook: makes the next `n` `cancel_order` calls against this
    /// order return a retriable `ExchangeAdapterError::Server` before a
    /// later attempt succeeds, driving cancel-retry-backoff scenarios
    /// without a live exchange flaking on its own schedule.
    pub fn set_cancel_failures(&self, exchange_order_id: &str, n: u32) {
        if let Some(mut entry) = self.orders.get_mut(exchange_order_id) {
            entry.remaining_cancel_failures = n;
        }
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    fn exchange_name(&self) -> &str {
        &self.config.exchange_name
    }

    async fn create_order(&self, request: CreateOrderRequest) -> Result<NormalizedOrder, ExchangeAdapterError> {
        self.simulate_latency().await;

        if self.config.reject_symbols.contains(&request.symbol) {
            return Err(ExchangeAdapterError::Api {
                status: 400,
                message: format!("symbol {} rejected by mock config", request.symbol),
            });
        }

        let exchange_order_id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let status = if self.config.fill_immediately { OrderStatus::Filled } else { OrderStatus::Open };
        let filled_quantity = if self.config.fill_immediately { request.quantity } else { Decimal::ZERO };
        let average_price = if self.config.fill_immediately { request.price } else { None };

        let normalized = NormalizedOrder {
            exchange_order_id: exchange_order_id.clone(),
            status,
            filled_quantity,
            average_price,
            fee: Decimal::ZERO,
            raw: json!({ "mock": true }),
        };

        self.orders.insert(
            exchange_order_id.clone(),
            MockOrder {
                normalized: normalized.clone(),
                symbol: request.symbol.clone(),
                requested_quantity: request.quantity,
                remaining_cancel_failures: 0,
            },
        );

        if self.config.fill_immediately {
            let _ = self.events.send(RawOrderEvent {
                exchange_order_id: Some(exchange_order_id),
                symbol: Some(request.symbol),
                raw: json!({ "status": "FILLED" }),
            });
        }

        Ok(normalized)
    }

    async fn cancel_order(&self, _symbol: &str, exchange_order_id: &str) -> Result<NormalizedOrder, ExchangeAdapterError> {
        self.simulate_latency().await;

        let Some(mut entry) = self.orders.get_mut(exchange_order_id) else {
            return Err(ExchangeAdapterError::OrderNotFound(exchange_order_id.to_string()));
        };

        if entry.normalized.status.is_terminal() {
            return Err(ExchangeAdapterError::OrderNotFound(exchange_order_id.to_string()));
        }

        if entry.remaining_cancel_failures > 0 {
            entry.remaining_cancel_failures -= 1;
            return Err(ExchangeAdapterError::Server("mock: simulated 503".to_string()));
        }

        entry.normalized.status = OrderStatus::Cancelled;
        Ok(entry.normalized.clone())
    }

    async fn fetch_order(&self, _symbol: &str, exchange_order_id: &str, _market_type: MarketType) -> Result<NormalizedOrder, ExchangeAdapterError> {
        self.simulate_latency().await;
        self.orders
            .get(exchange_order_id)
            .map(|entry| entry.normalized.clone())
            .ok_or_else(|| ExchangeAdapterError::OrderNotFound(exchange_order_id.to_string()))
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<NormalizedOrder>, ExchangeAdapterError> {
        self.simulate_latency().await;
        Ok(self
            .orders
            .iter()
            .filter(|entry| !entry.normalized.status.is_terminal())
            .filter(|entry| symbol.map_or(true, |s| s == entry.symbol))
            .map(|entry| entry.normalized.clone())
            .collect())
    }

    async fn fetch_balance(&self, _asset: &str, _market_type: MarketType) -> Result<Balance, ExchangeAdapterError> {
        self.simulate_latency().await;
        Ok(Balance { total: Decimal::new(1_000_000, 2), free: Decimal::new(1_000_000, 2) })
    }

    fn normalize_symbol(&self, standard: &str) -> String {
        standard.replace('/', "")
    }

    fn normalize_status(&self, raw: &serde_json::Value) -> OrderStatus {
        match raw.get("status").and_then(|v| v.as_str()) {
            Some("FILLED") => OrderStatus::Filled,
            Some("CANCELLED") => OrderStatus::Cancelled,
            Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
            _ => OrderStatus::Open,
        }
    }

    async fn subscribe_private_orders(&self) -> Result<Box<dyn PrivateOrderStream>, ExchangeAdapterError> {
        Ok(Box::new(MockPrivateOrderStream { receiver: self.events.subscribe() }))
    }
}

struct MockPrivateOrderStream {
    receiver: broadcast::Receiver<RawOrderEvent>,
}

#[async_trait]
impl PrivateOrderStream for MockPrivateOrderStream {
    async fn recv(&mut self) -> Option<RawOrderEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                // A slow consumer missing a few broadcast events isn't a
                // hard error here; it just re-polls for the next one.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::domain::Side;

    fn request(symbol: &str, quantity: Decimal) -> CreateOrderRequest {
        CreateOrderRequest {
            symbol: symbol.to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity,
            price: Some(Decimal::new(50_000, 0)),
            stop_price: None,
            market_type: MarketType::Spot,
            params: json!({}),
        }
    }

    #[tokio::test]
    async fn fills_immediately_by_default() {
        let adapter = MockExchangeAdapter::new(MockExchangeConfig::new("mock"));
        let order = adapter.create_order(request("BTCUSDT", Decimal::ONE)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, Decimal::ONE);
    }

    #[tokio::test]
    async fn rejects_configured_symbols() {
        let config = MockExchangeConfig { reject_symbols: HashSet::from(["BANNED".to_string()]), ..MockExchangeConfig::new("mock") };
        let adapter = MockExchangeAdapter::new(config);
        let err = adapter.create_order(request("BANNED", Decimal::ONE)).await.unwrap_err();
        assert!(matches!(err, ExchangeAdapterError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn cancel_of_unknown_order_is_order_not_found() {
        let adapter = MockExchangeAdapter::new(MockExchangeConfig::new("mock"));
        let err = adapter.cancel_order("BTCUSDT", "nonexistent").await.unwrap_err();
        assert!(err.is_already_gone());
    }

    #[tokio::test]
    async fn deferred_fill_emits_private_stream_event() {
        let config = MockExchangeConfig { fill_immediately: false, ..MockExchangeConfig::new("mock") };
        let adapter = MockExchangeAdapter::new(config);
        let order = adapter.create_order(request("BTCUSDT", Decimal::ONE)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Open);

        let mut stream = adapter.subscribe_private_orders().await.unwrap();
        adapter.fill(&order.exchange_order_id, Decimal::new(50_000, 0), Decimal::ZERO);
        let event = stream.recv().await.unwrap();
        assert_eq!(event.exchange_order_id.as_deref(), Some(order.exchange_order_id.as_str()));
    }
}
