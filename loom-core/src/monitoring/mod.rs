//! Prometheus metrics export for the execution pipeline (SPEC_FULL.md §1.1).
//!
//! A thin `hyper`-based `/metrics` server, grounded directly on the
//! teacher's own `monitoring::server` module, exposing queue depth,
//! rebalance latency, fill confirmation latency, retry outcomes, and
//! webhook throughput for each running `TradingSystem`.

pub mod metrics;
pub mod server;

pub use metrics::{FillMetrics, MetricsRegistry, QueueMetrics, RetryMetrics, WebhookMetrics};
pub use server::{MetricsServer, MetricsServerConfig};
