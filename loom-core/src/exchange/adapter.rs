//! ExchangeAdapter (C1) — the capability every other component consumes.
//! Concrete implementations (Bybit/Binance-style REST+WS clients, the
//! in-memory mock used by tests) live in the `loom-exchanges` crate; this
//! crate only defines the contract (spec.md §1 Non-goals: "the core does
//! not implement exchange adapters themselves").

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::{MarketType, OrderStatus, OrderType, Side};
use crate::error::ExchangeAdapterError;

/// Parameters for `create_order`, bundled so adding an optional field
/// doesn't change every call site's signature.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub market_type: MarketType,
    /// Exchange-specific extras (e.g. time-in-force, reduce-only).
    pub params: Value,
}

/// Normalized representation of an order as reported by the exchange,
/// returned by `create_order`, `cancel_order` and `fetch_order`.
#[derive(Debug, Clone)]
pub struct NormalizedOrder {
    pub exchange_order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub fee: Decimal,
    pub raw: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct Balance {
    pub total: Decimal,
    pub free: Decimal,
}

/// A raw message from an account's private order stream, handed to
/// whatever callback `subscribe_private_orders` was given.
#[derive(Debug, Clone)]
pub struct RawOrderEvent {
    pub exchange_order_id: Option<String>,
    pub symbol: Option<String>,
    pub raw: Value,
}

/// The capability set spec.md §4.1 describes. `#[async_trait]` is used
/// (rather than native `async fn` in traits) so this can be held as
/// `Arc<dyn ExchangeAdapter>` — every component past C1 is generic over
/// "some exchange", never over a concrete exchange type.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange_name(&self) -> &str;

    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<NormalizedOrder, ExchangeAdapterError>;

    async fn cancel_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<NormalizedOrder, ExchangeAdapterError>;

    async fn fetch_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
        market_type: MarketType,
    ) -> Result<NormalizedOrder, ExchangeAdapterError>;

    async fn open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<NormalizedOrder>, ExchangeAdapterError>;

    async fn fetch_balance(
        &self,
        asset: &str,
        market_type: MarketType,
    ) -> Result<Balance, ExchangeAdapterError>;

    /// Maps a standard `BASE/QUOTE` symbol to this exchange's native form.
    fn normalize_symbol(&self, standard: &str) -> String;

    /// Maps this exchange's raw status string/code to the subset of
    /// [`OrderStatus`] the wire protocol can express.
    fn normalize_status(&self, raw: &Value) -> OrderStatus;

    /// Opens the account's private order-update stream (spec.md §4.1,
    /// §6 "Private WebSocket"). Returns a handle C6 polls with `recv()`;
    /// reconnect/backoff is C6's concern, not the adapter's.
    async fn subscribe_private_orders(
        &self,
    ) -> Result<Box<dyn PrivateOrderStream>, ExchangeAdapterError>;
}

/// Subscription handle so a caller can tear the stream down on shutdown
/// without the adapter needing to know about `TradingSystem`'s lifecycle.
#[async_trait]
pub trait PrivateOrderStream: Send + Sync {
    async fn recv(&mut self) -> Option<RawOrderEvent>;
    async fn close(&mut self);
}
