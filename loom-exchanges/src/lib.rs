//! Concrete `ExchangeAdapter` implementations. `loom-core` defines the
//! contract and never talks to an exchange directly (spec.md §1
//! Non-goals); this crate is the only place that does.
//!
//! - [`mock`] — deterministic in-memory adapter used by integration tests
//!   and the `loom-paper` binary, with injectable latency/rejection for
//!   exercising C5/C6/C7's error paths without a live exchange.
//! - [`rest`] — HMAC-signed REST + WS client shape shared by the
//!   Bybit/Binance-style exchanges this system trades on. One struct per
//!   exchange would repeat this shell; `RestExchange` takes the signing
//!   and endpoint differences as constructor arguments instead.

pub mod mock;
pub mod rest;

pub use mock::MockExchangeAdapter;
pub use rest::{RestExchange, RestExchangeConfig};
