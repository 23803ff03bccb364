//! The composition root (SPEC_FULL.md §4.0, §9 redesign notes).
//!
//! Nothing here is ambient or global: `TradingSystem` owns every
//! component as an `Arc`-held value and wires them together once, at
//! construction. Background loops — one `OrderFillMonitor` per account,
//! `CancelQueueWorker`, `FailedOrderManager`, the processing-lock reaper
//! and the price/symbol-cache sweeps — are spawned into one
//! `tokio::task::JoinSet` on `start()` and torn down on `shutdown()`.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinSet;
use tracing::info;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{Error, RepositoryError};
use crate::exchange::{ExchangeAdapter, ExchangeRegistry};
use crate::fill_monitor::{KeepAlive, OrderFillMonitor};
use crate::monitoring::{MetricsRegistry, MetricsServer, MetricsServerConfig};
use crate::pricing::PriceCache;
use crate::queue::OrderQueueManager;
use crate::repository::{OrderRepository, StrategyRepository};
use crate::resilience::supervise;
use crate::retry::{CancelQueueWorker, FailedOrderManager};
use crate::validation::SymbolValidator;
use crate::webhook::{WebhookDispatcher, WebhookLockRegistry, WebhookServer, WebhookServerConfig};

use crate::domain::OrderMappingCache;

/// How often the crash-recovery reaper clears stale `is_processing` locks
/// (spec.md §4.4 `reap_stale_processing`, §7 crash recovery: "threshold
/// e.g. 5 minutes").
const REAP_THRESHOLD: Duration = Duration::from_secs(5 * 60);
const REAP_INTERVAL: Duration = Duration::from_secs(60);
const PRICE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const MAPPING_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Everything C1-C9 needs to run, held as plain values (spec.md §9: "no
/// module-level singletons... each component is a value with an
/// init/shutdown pair").
pub struct TradingSystem {
    settings: Settings,
    repository: Arc<OrderRepository>,
    strategies: Arc<StrategyRepository>,
    validator: Arc<SymbolValidator>,
    prices: Arc<PriceCache>,
    queue: Arc<OrderQueueManager>,
    dispatcher: Arc<WebhookDispatcher>,
    exchanges: Arc<ExchangeRegistry>,
    mapping_cache: Arc<OrderMappingCache>,
    metrics: Arc<MetricsRegistry>,
    webhook_locks: Arc<WebhookLockRegistry>,
}

impl TradingSystem {
    /// `exchanges` maps each configured account id to the capability that
    /// talks to its exchange. Constructing those adapters (decrypting
    /// credentials, dialing REST/WS endpoints) is the caller's concern —
    /// this crate consumes the capability, it does not build it
    /// (spec.md §1 Non-goals).
    pub async fn new(settings: Settings, exchanges: ExchangeRegistry) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.db_pool_size + settings.db_max_overflow)
            .connect(&settings.database_url)
            .await
            .map_err(RepositoryError::from)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Repository(RepositoryError::Database(sqlx::Error::Migrate(Box::new(e)))))?;

        let repository = Arc::new(OrderRepository::new(pool.clone()));
        let strategies = Arc::new(StrategyRepository::new(pool.clone()));
        let validator = Arc::new(SymbolValidator::new());
        let prices = Arc::new(PriceCache::with_default_ttl());
        let mapping_cache = Arc::new(OrderMappingCache::with_default_ttl());
        let queue = Arc::new(OrderQueueManager::new(
            repository.clone(),
            validator.clone(),
            mapping_cache.clone(),
        ));
        let locks = Arc::new(WebhookLockRegistry::new(
            settings.max_webhook_locks,
            settings.webhook_lock_timeout,
        ));
        let exchanges = Arc::new(exchanges);
        let metrics = Arc::new(MetricsRegistry::new().map_err(|e| {
            Error::Config(crate::error::ConfigError::Invalid {
                name: "metrics_registry",
                value: String::new(),
                reason: e.to_string(),
            })
        })?);

        let dispatcher = Arc::new(
            WebhookDispatcher::new(
                strategies.clone(),
                repository.clone(),
                queue.clone(),
                validator.clone(),
                prices.clone(),
                exchanges.clone(),
                locks.clone(),
            )
            .with_end_to_end_timeout(Duration::from_secs(10)),
        );

        Ok(Self {
            settings,
            repository,
            strategies,
            validator,
            prices,
            queue,
            dispatcher,
            exchanges,
            mapping_cache,
            metrics,
            webhook_locks: locks,
        })
    }

    pub fn repository(&self) -> &Arc<OrderRepository> {
        &self.repository
    }

    pub fn validator(&self) -> &Arc<SymbolValidator> {
        &self.validator
    }

    pub fn queue(&self) -> &Arc<OrderQueueManager> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Spawns every background loop and the webhook HTTP server into one
    /// `JoinSet`, each wrapped in [`supervise`] so a panic restarts the
    /// loop instead of silently ending it or tearing down the process
    /// (SPEC_FULL.md §5.1). The returned `JoinSet` is the caller's handle
    /// to wait on or abort at shutdown.
    pub async fn start(&self) -> Result<JoinSet<()>, Error> {
        let mut tasks = JoinSet::new();

        // C6: one supervisor per account with a registered adapter.
        for (&account_id, adapter) in self.exchanges.iter() {
            let monitor = Arc::new(OrderFillMonitor::new(
                account_id,
                adapter.clone(),
                self.repository.clone(),
                self.validator.clone(),
                self.queue.clone(),
                self.mapping_cache.clone(),
                KeepAlive::bybit_style(),
            ));
            tasks.spawn(supervise(Box::leak(format!("fill_monitor[{account_id}]").into_boxed_str()), move || {
                let monitor = monitor.clone();
                async move { monitor.clone().run().await }
            }));
        }

        // C7: cancel queue drain and failed-order retry.
        let cancel_worker = Arc::new(CancelQueueWorker::new(self.repository.clone(), self.exchanges.clone()));
        tasks.spawn(supervise("cancel_queue_worker", move || {
            let cancel_worker = cancel_worker.clone();
            async move { cancel_worker.clone().run().await }
        }));

        let failed_order_manager = Arc::new(FailedOrderManager::new(self.repository.clone(), self.exchanges.clone()));
        tasks.spawn(supervise("failed_order_manager", move || {
            let failed_order_manager = failed_order_manager.clone();
            async move { failed_order_manager.clone().run().await }
        }));

        // Crash-recovery reaper (spec.md §4.4 `reap_stale_processing`, §7).
        let repository = self.repository.clone();
        tasks.spawn(supervise("processing_lock_reaper", move || {
            let repository = repository.clone();
            async move { reap_loop(repository).await }
        }));

        // Scheduled sweeps: stale price/FX entries (spec.md §4.3) and
        // expired order-mapping cache entries (spec.md §3).
        let prices = self.prices.clone();
        tasks.spawn(supervise("price_cache_sweep", move || {
            let prices = prices.clone();
            async move { price_sweep_loop(prices).await }
        }));

        let mapping_cache = self.mapping_cache.clone();
        tasks.spawn(supervise("mapping_cache_sweep", move || {
            let mapping_cache = mapping_cache.clone();
            async move { mapping_sweep_loop(mapping_cache).await }
        }));

        let webhook_locks = self.webhook_locks.clone();
        tasks.spawn(supervise("webhook_lock_sweep", move || {
            let webhook_locks = webhook_locks.clone();
            async move { webhook_lock_sweep_loop(webhook_locks).await }
        }));

        // C8: the webhook HTTP ingress.
        let webhook_config = WebhookServerConfig {
            listen_addr: self.settings.webhook_listen_addr.parse().map_err(|_| {
                Error::Config(crate::error::ConfigError::Invalid {
                    name: "WEBHOOK_LISTEN_ADDR",
                    value: self.settings.webhook_listen_addr.clone(),
                    reason: "not a valid socket address".to_string(),
                })
            })?,
            webhook_path: "/api/webhook".to_string(),
        };
        let dispatcher = self.dispatcher.clone();
        tasks.spawn(supervise("webhook_server", move || {
            let server = WebhookServer::new(webhook_config.clone(), dispatcher.clone());
            async move {
                if let Err(e) = server.serve().await {
                    tracing::error!(error = %e, "webhook server exited");
                }
            }
        }));

        // Prometheus scrape surface (SPEC_FULL.md §1.1 ambient-stack mandate).
        let metrics_addr = self.settings.metrics_listen_addr.parse().map_err(|_| {
            Error::Config(crate::error::ConfigError::Invalid {
                name: "METRICS_LISTEN_ADDR",
                value: self.settings.metrics_listen_addr.clone(),
                reason: "not a valid socket address".to_string(),
            })
        })?;
        let metrics = self.metrics.clone();
        tasks.spawn(supervise("metrics_server", move || {
            let server = MetricsServer::new(
                MetricsServerConfig {
                    listen_addr: metrics_addr,
                    metrics_path: "/metrics".to_string(),
                },
                metrics.clone(),
            );
            async move {
                if let Err(e) = server.serve().await {
                    tracing::error!(error = %e, "metrics server exited");
                }
            }
        }));

        info!(tasks = tasks.len(), "trading system started");
        Ok(tasks)
    }

    /// Aborts every supervised task. There is no per-component shutdown
    /// hook to call beyond this — none of C1-C9 hold anything that needs
    /// draining beyond the Postgres pool, which drops with `self`.
    pub async fn shutdown(self, mut tasks: JoinSet<()>) {
        info!("shutting down trading system");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        self.repository.pool().close().await;
    }
}

async fn reap_loop(repository: Arc<OrderRepository>) {
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    loop {
        ticker.tick().await;
        match repository
            .reap_stale_processing(chrono::Duration::from_std(REAP_THRESHOLD).unwrap())
            .await
        {
            Ok(0) => {}
            Ok(n) => tracing::warn!(reaped = n, "cleared stale processing locks"),
            Err(e) => tracing::error!(error = %e, "processing lock reaper failed"),
        }
    }
}

async fn price_sweep_loop(prices: Arc<PriceCache>) {
    let mut ticker = tokio::time::interval(PRICE_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        prices.sweep_stale();
    }
}

async fn mapping_sweep_loop(mapping_cache: Arc<OrderMappingCache>) {
    let mut ticker = tokio::time::interval(MAPPING_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let removed = mapping_cache.sweep_expired();
        if removed > 0 {
            tracing::debug!(removed, "swept expired order-mapping cache entries");
        }
    }
}

async fn webhook_lock_sweep_loop(webhook_locks: Arc<WebhookLockRegistry>) {
    let mut ticker = tokio::time::interval(MAPPING_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let removed = webhook_locks.sweep_idle();
        if removed > 0 {
            tracing::debug!(removed, "swept idle webhook locks");
        }
    }
}

/// Accounts this system currently monitors (for admin/debug tooling).
pub fn monitored_accounts(exchanges: &ExchangeRegistry) -> Vec<Uuid> {
    exchanges.keys().copied().collect()
}
