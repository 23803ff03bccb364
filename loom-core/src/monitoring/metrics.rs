//! Prometheus metrics for the order execution pipeline (SPEC_FULL.md §1.1).
//!
//! Grounded on the teacher's `monitoring::metrics` registry shape (one
//! `Registry`, several grouped metric-family structs behind accessor
//! methods) but re-pointed at the execution-layer concerns this system
//! actually needs: queue depth, rebalance latency, cancel retry counts,
//! fill confirmation latency, webhook throughput.

use prometheus::{
    Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use tracing::info;

/// Central registry for all Prometheus metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    queue: Arc<QueueMetrics>,
    fills: Arc<FillMetrics>,
    retry: Arc<RetryMetrics>,
    webhook: Arc<WebhookMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let queue = Arc::new(QueueMetrics::new(&registry)?);
        let fills = Arc::new(FillMetrics::new(&registry)?);
        let retry = Arc::new(RetryMetrics::new(&registry)?);
        let webhook = Arc::new(WebhookMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            queue,
            fills,
            retry,
            webhook,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue
    }

    pub fn fills(&self) -> &FillMetrics {
        &self.fills
    }

    pub fn retry(&self) -> &RetryMetrics {
        &self.retry
    }

    pub fn webhook(&self) -> &WebhookMetrics {
        &self.webhook
    }
}

impl Default for MetricsRegistry {
    #[allow(clippy::panic)]
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("FATAL: failed to create metrics registry: {}", e);
            panic!("cannot create metrics registry")
        })
    }
}

/// OrderQueueManager (C5) metrics.
pub struct QueueMetrics {
    /// Current depth of the pending-order backlog, per (account, symbol) bucket.
    pub pending_depth: IntGaugeVec,
    /// Number of OpenOrder rows currently live on the exchange, per bucket.
    pub open_depth: IntGaugeVec,
    /// Rebalance wall-clock latency.
    pub rebalance_latency_ms: Histogram,
    /// Rebalance invocations, tagged by trigger.
    pub rebalance_total: IntCounterVec,
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let pending_depth = IntGaugeVec::new(
            Opts::new(
                "queue_pending_depth",
                "Pending orders currently queued per (account, symbol) bucket",
            )
            .namespace("loom"),
            &["account_id", "symbol"],
        )?;
        registry.register(Box::new(pending_depth.clone()))?;

        let open_depth = IntGaugeVec::new(
            Opts::new(
                "queue_open_depth",
                "Open orders currently live on the exchange per bucket",
            )
            .namespace("loom"),
            &["account_id", "symbol"],
        )?;
        registry.register(Box::new(open_depth.clone()))?;

        let rebalance_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "loom_queue_rebalance_latency_ms",
                "Wall-clock latency of OrderQueueManager::rebalance",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
        )?;
        registry.register(Box::new(rebalance_latency_ms.clone()))?;

        let rebalance_total = IntCounterVec::new(
            Opts::new("queue_rebalance_total", "Rebalance invocations by trigger").namespace("loom"),
            &["trigger"],
        )?;
        registry.register(Box::new(rebalance_total.clone()))?;

        Ok(Self {
            pending_depth,
            open_depth,
            rebalance_latency_ms,
            rebalance_total,
        })
    }
}

/// OrderFillMonitor (C6) metrics.
pub struct FillMetrics {
    /// Time from WS event receipt to REST confirmation landing in the DB.
    pub confirmation_latency_ms: Histogram,
    /// Fill events processed, tagged by terminal/non-terminal outcome.
    pub events_total: IntCounterVec,
    /// Fill events dropped (no OpenOrder, no OrderMapping entry).
    pub dropped_total: IntCounter,
    /// Current WS protocol state per account (encoded 0..=5, see `state::ConnectionState`).
    pub ws_state: IntGaugeVec,
}

impl FillMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let confirmation_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "loom_fill_confirmation_latency_ms",
                "Latency from WS order event to REST-confirmed DB update",
            )
            .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]),
        )?;
        registry.register(Box::new(confirmation_latency_ms.clone()))?;

        let events_total = IntCounterVec::new(
            Opts::new("fill_events_total", "Fill events processed").namespace("loom"),
            &["account_id", "outcome"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let dropped_total = IntCounter::new(
            "loom_fill_events_dropped_total",
            "Fill events dropped: no matching OpenOrder or OrderMapping entry",
        )?;
        registry.register(Box::new(dropped_total.clone()))?;

        let ws_state = IntGaugeVec::new(
            Opts::new("fill_ws_state", "Current private-stream connection state").namespace("loom"),
            &["account_id"],
        )?;
        registry.register(Box::new(ws_state.clone()))?;

        Ok(Self {
            confirmation_latency_ms,
            events_total,
            dropped_total,
            ws_state,
        })
    }
}

/// CancelQueueWorker / FailedOrderManager (C7) metrics.
pub struct RetryMetrics {
    /// Cancel queue items claimed per tick, by terminal classification.
    pub cancel_outcomes_total: IntCounterVec,
    /// FailedOrder retries, by operation type and classification.
    pub failed_order_outcomes_total: IntCounterVec,
    /// Current retry_count distribution snapshot (gauge, sampled per tick).
    pub retry_count_max: IntGauge,
}

impl RetryMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let cancel_outcomes_total = IntCounterVec::new(
            Opts::new("cancel_queue_outcomes_total", "CancelQueueWorker tick outcomes")
                .namespace("loom"),
            &["outcome"],
        )?;
        registry.register(Box::new(cancel_outcomes_total.clone()))?;

        let failed_order_outcomes_total = IntCounterVec::new(
            Opts::new(
                "failed_order_outcomes_total",
                "FailedOrderManager retry outcomes",
            )
            .namespace("loom"),
            &["operation_type", "outcome"],
        )?;
        registry.register(Box::new(failed_order_outcomes_total.clone()))?;

        let retry_count_max = IntGauge::new(
            "loom_retry_count_max",
            "Highest retry_count observed across pending CancelQueue/FailedOrder rows",
        )?;
        registry.register(Box::new(retry_count_max.clone()))?;

        Ok(Self {
            cancel_outcomes_total,
            failed_order_outcomes_total,
            retry_count_max,
        })
    }
}

/// WebhookDispatcher (C8) metrics.
pub struct WebhookMetrics {
    /// Webhooks received, tagged by outcome (authed/rejected/timeout).
    pub requests_total: IntCounterVec,
    /// End-to-end webhook processing latency.
    pub processing_latency_ms: Histogram,
    /// Currently-held per-(strategy, symbol) locks.
    pub locks_held: IntGauge,
}

impl WebhookMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("webhook_requests_total", "Webhooks received by outcome").namespace("loom"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let processing_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "loom_webhook_processing_latency_ms",
                "End-to-end webhook processing latency",
            )
            .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 10000.0]),
        )?;
        registry.register(Box::new(processing_latency_ms.clone()))?;

        let locks_held = IntGauge::new(
            "loom_webhook_locks_held",
            "Currently-held per-(strategy, symbol) locks",
        )?;
        registry.register(Box::new(locks_held.clone()))?;

        Ok(Self {
            requests_total,
            processing_latency_ms,
            locks_held,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_registers_all_families() {
        let registry = MetricsRegistry::new().unwrap();
        registry
            .queue()
            .pending_depth
            .with_label_values(&["acc-1", "BTC/USDT"])
            .set(3);
        registry.fills().dropped_total.inc();
        registry
            .retry()
            .cancel_outcomes_total
            .with_label_values(&["success"])
            .inc();
        registry
            .webhook()
            .requests_total
            .with_label_values(&["authed"])
            .inc();

        let families = registry.registry().gather();
        assert!(!families.is_empty());
    }

    #[test]
    fn default_panics_only_on_duplicate_registration() {
        // Constructing twice against independent registries must not panic.
        let _a = MetricsRegistry::new().unwrap();
        let _b = MetricsRegistry::new().unwrap();
    }
}
