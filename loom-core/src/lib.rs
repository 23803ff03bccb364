//! loom-core — the multi-account, multi-exchange order execution layer.
//!
//! A TradingView webhook names a strategy; this crate fans that signal out
//! across every exchange account bound to it, queues what the exchange's
//! open-order ceiling can't take yet, reconciles fills off each account's
//! private WS stream, and keeps retrying cancels and rejected creates until
//! they resolve. `system::TradingSystem` is the composition root that wires
//! all of it together at startup.
//!
//! ## Modules
//! - `domain`: plain-data types shared by every other module.
//! - `exchange`: the `ExchangeAdapter` trait (C1) and its rate limiter.
//! - `validation`: `SymbolValidator` (C2) — symbol metadata, rounding, the
//!   per-exchange open-order ceiling.
//! - `pricing`: `PriceCache` (C3) — mark prices and the USDT/KRW rate.
//! - `repository`: Postgres persistence for orders, trades, positions, the
//!   cancel queue and the failed-order queue (C4).
//! - `queue`: `OrderQueueManager` (C5) — bucket submission and rebalancing.
//! - `fill_monitor`: `OrderFillMonitor` (C6) — per-account WS reconciliation.
//! - `monitoring`: Prometheus `/metrics` export (queue depth, rebalance and
//!   fill-confirmation latency, retry outcomes, webhook throughput).
//! - `position`: `PositionReconciler` (C9) — average-entry PnL bookkeeping.
//! - `retry`: `CancelQueueWorker` and `FailedOrderManager` (C7).
//! - `webhook`: `WebhookDispatcher` (C8) — HTTP ingress, auth, fan-out.
//! - `resilience`: exponential backoff, panic-catching task supervision.
//! - `config`: `Settings::from_env()`.
//! - `error`: the typed error taxonomy every module returns.
//! - `system`: the composition root, `TradingSystem`.

pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod fill_monitor;
pub mod monitoring;
pub mod position;
pub mod pricing;
pub mod queue;
pub mod repository;
pub mod resilience;
pub mod retry;
pub mod system;
pub mod validation;
pub mod webhook;

pub use error::{Error, Result};
pub use system::TradingSystem;

/// Convenience imports for binaries wiring up a `TradingSystem`.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{Error, Result};
    pub use crate::exchange::ExchangeAdapter;
    pub use crate::system::TradingSystem;
}
