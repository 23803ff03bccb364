//! OrderFillMonitor (C6) — one supervisor per account, reconciling the
//! exchange's private order stream against `open_orders` (spec.md §4.6).
//!
//! A WS message only ever *triggers* a confirmation; every fill is
//! re-fetched over REST before anything is written, so a malformed or
//! out-of-order WS payload can never corrupt persisted state (spec.md §4.6
//! step 2, §7). Keep-alive cadence and reconnect backoff reuse
//! `resilience::backoff::ExponentialBackoff` verbatim, same as the teacher's
//! connection-supervisor loops.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{MarketType, OpenOrder, OrderMappingCache};
use crate::error::{Error, ExchangeAdapterError, RepositoryError};
use crate::exchange::{ExchangeAdapter, NormalizedOrder, PrivateOrderStream, RawOrderEvent};
use crate::position::PositionReconciler;
use crate::queue::{BucketLimits, OrderQueueManager};
use crate::repository::{OrderRepository, StrategyRepository, TradeRepository, Tx};
use crate::resilience::{BackoffConfig, ExponentialBackoff};
use crate::validation::SymbolValidator;

use super::state::{transition, ConnectionState, Event as FsmEvent};

/// Keep-alive cadence differs per exchange (Bybit-style ping every 20s,
/// Binance-style listen-key renewal every 30m), so this is per-instance
/// rather than a crate-wide constant.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    pub interval: Duration,
}

impl KeepAlive {
    pub fn bybit_style() -> Self {
        Self {
            interval: Duration::from_secs(20),
        }
    }

    pub fn binance_listen_key() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
        }
    }
}

/// How often the repair sweep re-fetches open orders over REST. Coarser
/// than keep-alive: this is belt-and-suspenders for an event the WS stream
/// dropped or a crash swallowed mid-reconcile (spec.md §8 scenario 4), not
/// the primary delivery path.
const REPAIR_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct OrderFillMonitor {
    account_id: Uuid,
    exchange: Arc<dyn ExchangeAdapter>,
    repository: Arc<OrderRepository>,
    validator: Arc<SymbolValidator>,
    queue: Arc<OrderQueueManager>,
    mapping_cache: Arc<OrderMappingCache>,
    keep_alive: KeepAlive,
    fetch_timeout: Duration,
    state: Mutex<ConnectionState>,
}

impl OrderFillMonitor {
    pub fn new(
        account_id: Uuid,
        exchange: Arc<dyn ExchangeAdapter>,
        repository: Arc<OrderRepository>,
        validator: Arc<SymbolValidator>,
        queue: Arc<OrderQueueManager>,
        mapping_cache: Arc<OrderMappingCache>,
        keep_alive: KeepAlive,
    ) -> Self {
        Self {
            account_id,
            exchange,
            repository,
            validator,
            queue,
            mapping_cache,
            keep_alive,
            fetch_timeout: Duration::from_secs(5),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    /// Runs until the process is torn down. Reconnects with exponential
    /// backoff on any retriable drop; holds forever in `Error{retriable:
    /// false}` on an auth rejection, since that needs an operator, not a
    /// retry (spec.md §4.6).
    pub async fn run(self: Arc<Self>) {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig::conservative());

        loop {
            self.advance(FsmEvent::SocketOpened).await;

            match self.exchange.subscribe_private_orders().await {
                Ok(stream) => {
                    backoff.reset();
                    self.advance(FsmEvent::AuthSent).await;
                    self.advance(FsmEvent::AuthAccepted).await;
                    self.advance(FsmEvent::SubscribeAccepted).await;
                    self.drive_stream(stream).await;
                }
                Err(e) => {
                    warn!(
                        account_id = %self.account_id,
                        exchange = %self.exchange.exchange_name(),
                        error = %e,
                        "failed to open private order stream"
                    );
                }
            }

            if matches!(*self.state.lock().await, ConnectionState::Error { retriable: false }) {
                error!(
                    account_id = %self.account_id,
                    "order fill monitor halted: non-retriable auth failure, awaiting operator intervention"
                );
                return;
            }

            match backoff.next_delay() {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    self.advance(FsmEvent::BackoffElapsed).await;
                }
                None => {
                    error!(account_id = %self.account_id, "order fill monitor exhausted reconnect attempts");
                    return;
                }
            }
        }
    }

    async fn advance(&self, event: FsmEvent) {
        let mut guard = self.state.lock().await;
        let (next, actions) = transition(guard.clone(), event);
        *guard = next;
        for action in actions {
            debug!(account_id = %self.account_id, ?action, "connection fsm action");
        }
    }

    async fn drive_stream(&self, mut stream: Box<dyn PrivateOrderStream>) {
        let mut ticker = interval(self.keep_alive.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Burn the immediate first tick so we don't ping right after connecting.
        ticker.tick().await;

        loop {
            tokio::select! {
                event = stream.recv() => {
                    match event {
                        Some(raw) => {
                            self.advance(FsmEvent::FirstMessageReceived).await;
                            if let Err(e) = self.handle_event(raw).await {
                                error!(account_id = %self.account_id, error = %e, "failed to reconcile fill event");
                                self.advance(FsmEvent::ParseFailure).await;
                            }
                        }
                        None => {
                            warn!(account_id = %self.account_id, "private order stream closed");
                            self.advance(FsmEvent::SocketClosed).await;
                            stream.close().await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    debug!(account_id = %self.account_id, "keep-alive tick");
                }
            }
        }
    }

    /// Steps 1-2 of spec.md §4.6: resolve the bucket a raw event belongs
    /// to, then confirm it over REST before touching anything.
    async fn handle_event(&self, raw: RawOrderEvent) -> Result<(), Error> {
        let Some(exchange_order_id) = raw.exchange_order_id.clone() else {
            debug!(account_id = %self.account_id, "order event missing exchange_order_id, ignoring");
            return Ok(());
        };

        let mapping = self.mapping_cache.resolve(&exchange_order_id);
        let symbol = raw.symbol.clone().or_else(|| mapping.as_ref().map(|m| m.symbol.clone()));
        let market_type = mapping.as_ref().map(|m| m.market_type).unwrap_or(MarketType::Spot);

        let Some(symbol) = symbol else {
            warn!(
                account_id = %self.account_id,
                exchange_order_id,
                "could not resolve symbol for fill event, dropping"
            );
            return Ok(());
        };

        let normalized = timeout(
            self.fetch_timeout,
            self.exchange.fetch_order(&symbol, &exchange_order_id, market_type),
        )
        .await
        .map_err(|_| {
            Error::Exchange(ExchangeAdapterError::Network(format!(
                "fetch_order timed out confirming {exchange_order_id}"
            )))
        })??;

        self.reconcile(&exchange_order_id, normalized).await
    }

    /// Step 3: one transaction covering the processing lock, terminal
    /// transition, trade insert, position update and rebalance.
    async fn reconcile(&self, exchange_order_id: &str, normalized: NormalizedOrder) -> Result<(), Error> {
        let mut tx = self.repository.begin().await.map_err(Error::from)?;

        let order = match self.repository.find_by_exchange_order_id(&mut tx, exchange_order_id).await? {
            Some(order) => order,
            None => {
                // Nothing we know about; the order may belong to another
                // monitor or hasn't been persisted yet. Not our problem.
                tx.rollback().await.map_err(RepositoryError::from)?;
                return Ok(());
            }
        };

        if !self.repository.try_acquire_processing_lock(&mut tx, order.id).await? {
            // Another reconciliation already owns this order; let it finish.
            tx.rollback().await.map_err(RepositoryError::from)?;
            return Ok(());
        }

        match self.reconcile_locked(&mut tx, &order, normalized).await {
            Ok(()) => {
                tx.commit().await.map_err(RepositoryError::from)?;
                Ok(())
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "rolling back fill reconciliation");
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn reconcile_locked(
        &self,
        tx: &mut Tx<'_>,
        order: &OpenOrder,
        normalized: NormalizedOrder,
    ) -> Result<(), Error> {
        let fill_qty = normalized.filled_quantity - order.filled_quantity;
        let average_price = normalized.average_price.unwrap_or_default();

        if fill_qty > Decimal::ZERO {
            let inserted = TradeRepository::insert_if_absent(
                tx,
                order.strategy_account_id,
                &normalized.exchange_order_id,
                &order.symbol,
                order.side,
                fill_qty,
                order.price,
                average_price,
                normalized.fee,
                Decimal::ZERO,
                true,
                order.market_type,
            )
            .await?;

            if inserted.is_some() {
                let position =
                    PositionReconciler::load_for_update(tx, order.strategy_account_id, &order.symbol).await?;
                let outcome = PositionReconciler::apply_fill(&position, order.side, fill_qty, average_price);
                PositionReconciler::save(tx, &outcome.position).await?;

                // realized_pnl isn't known until the position row is locked,
                // so the trade above goes in with a placeholder and gets
                // patched here in the same transaction.
                sqlx::query("UPDATE trades SET realized_pnl = $1, is_entry = $2 WHERE exchange_order_id = $3")
                    .bind(outcome.realized_pnl)
                    .bind(outcome.is_entry)
                    .bind(&normalized.exchange_order_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(RepositoryError::from)?;
            }
        }

        self.repository
            .transition(tx, order.id, normalized.status, Some(normalized.filled_quantity))
            .await?;
        self.repository.release_processing_lock(tx, order.id).await?;

        if normalized.status.is_terminal() {
            self.mapping_cache.remove(&normalized.exchange_order_id);
            self.rebalance_after_fill(tx, order).await?;
        }

        Ok(())
    }

    async fn rebalance_after_fill(&self, tx: &mut Tx<'_>, order: &OpenOrder) -> Result<(), Error> {
        let Some(limits) = self.validator.limits_for(self.exchange.exchange_name(), order.market_type) else {
            warn!(
                account_id = %self.account_id,
                exchange = %self.exchange.exchange_name(),
                "no exchange limits cached; skipping rebalance after fill"
            );
            return Ok(());
        };

        let strategy_id = StrategyRepository::strategy_id_for_binding(tx, order.strategy_account_id).await?;
        let active = StrategyRepository::active_binding_count(tx, order.account_id)
            .await?
            .max(1) as usize;
        let share = (limits.max_open_orders / active).max(1);
        let bucket_limits = BucketLimits::from_exchange_limits(limits, share);

        self.queue
            .rebalance(
                tx,
                self.exchange.as_ref(),
                strategy_id,
                order.account_id,
                &order.symbol,
                bucket_limits,
            )
            .await?;
        Ok(())
    }
}

