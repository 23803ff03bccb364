//! C8: TradingView-style webhook ingestion, auth, per-(strategy, symbol)
//! locking and fan-out (spec.md §4.8, §6).

pub mod dispatcher;
pub mod http;
pub mod lock_registry;
pub mod payload;

pub use dispatcher::{AccountResult, PerformanceMetrics, Summary, WebhookDispatcher, WebhookResponse};
pub use http::{WebhookServer, WebhookServerConfig};
pub use lock_registry::WebhookLockRegistry;
pub use payload::{OrderSignal, WebhookPayload, WireOrderType};
