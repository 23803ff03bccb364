//! WebhookDispatcher (C8) — authenticates a TradingView-style webhook,
//! resolves it to one or more `StrategyAccount` bindings, sizes each
//! order against allocated capital, and hands the result to C5 (spec.md
//! §4.8).

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{Account, Strategy, StrategyAccount, StrategyCapital};
use crate::error::WebhookError;
use crate::exchange::ExchangeRegistry;
use crate::pricing::PriceCache;
use crate::queue::{BucketLimits, EnqueueOutcome, Intent, OrderQueueManager};
use crate::repository::{CancelQueueRepository, OrderRepository, StrategyRepository};
use crate::validation::SymbolValidator;

use super::lock_registry::WebhookLockRegistry;
use super::payload::{OrderSignal, WebhookPayload, WireOrderType};

const DEFAULT_END_TO_END_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct AccountResult {
    pub account_id: Uuid,
    pub symbol: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_accounts: usize,
    pub successful_orders: usize,
    pub failed_orders: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_ms: u128,
    pub validation_ms: u128,
    pub execution_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub action: String,
    pub strategy: String,
    pub message: String,
    pub results: Vec<AccountResult>,
    pub summary: Summary,
    pub performance_metrics: PerformanceMetrics,
}

impl WebhookResponse {
    fn rejected(payload: &WebhookPayload, err: &WebhookError, elapsed: Duration) -> Self {
        WebhookResponse {
            success: false,
            action: "rejected".to_string(),
            strategy: payload.group_name.clone(),
            message: err.to_string(),
            results: Vec::new(),
            summary: Summary {
                total_accounts: 0,
                successful_orders: 0,
                failed_orders: 0,
                success_rate: 0.0,
            },
            performance_metrics: PerformanceMetrics {
                total_ms: elapsed.as_millis(),
                validation_ms: elapsed.as_millis(),
                execution_ms: 0,
            },
        }
    }

    fn timed_out(payload: &WebhookPayload, elapsed: Duration) -> Self {
        WebhookResponse {
            success: true,
            action: "pending".to_string(),
            strategy: payload.group_name.clone(),
            message: "webhook accepted, still processing in the background".to_string(),
            results: Vec::new(),
            summary: Summary {
                total_accounts: 0,
                successful_orders: 0,
                failed_orders: 0,
                success_rate: 0.0,
            },
            performance_metrics: PerformanceMetrics {
                total_ms: elapsed.as_millis(),
                validation_ms: 0,
                execution_ms: 0,
            },
        }
    }
}

pub struct WebhookDispatcher {
    strategies: Arc<StrategyRepository>,
    orders: Arc<OrderRepository>,
    queue: Arc<OrderQueueManager>,
    validator: Arc<SymbolValidator>,
    prices: Arc<PriceCache>,
    exchanges: Arc<ExchangeRegistry>,
    locks: Arc<WebhookLockRegistry>,
    end_to_end_timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(
        strategies: Arc<StrategyRepository>,
        orders: Arc<OrderRepository>,
        queue: Arc<OrderQueueManager>,
        validator: Arc<SymbolValidator>,
        prices: Arc<PriceCache>,
        exchanges: Arc<ExchangeRegistry>,
        locks: Arc<WebhookLockRegistry>,
    ) -> Self {
        Self {
            strategies,
            orders,
            queue,
            validator,
            prices,
            exchanges,
            locks,
            end_to_end_timeout: DEFAULT_END_TO_END_TIMEOUT,
        }
    }

    pub fn with_end_to_end_timeout(mut self, timeout: Duration) -> Self {
        self.end_to_end_timeout = timeout;
        self
    }

    /// Entry point for the HTTP layer. Always returns `success: true` with
    /// action `"pending"` if the 10s deadline trips, since upstream
    /// webhook senders retry aggressively on non-200 (spec.md §4.8).
    pub async fn dispatch(self: Arc<Self>, payload: WebhookPayload) -> WebhookResponse {
        let start = Instant::now();
        let this = self.clone();
        let payload_for_task = payload.clone();
        let handle = tokio::spawn(async move { this.dispatch_inner(&payload_for_task).await });

        match timeout(self.end_to_end_timeout, handle).await {
            Ok(Ok(response)) => response,
            Ok(Err(join_err)) => {
                error!(group_name = %payload.group_name, error = %join_err, "webhook task panicked");
                WebhookResponse::rejected(
                    &payload,
                    &WebhookError::MalformedPayload("internal error processing webhook".to_string()),
                    start.elapsed(),
                )
            }
            Err(_) => {
                warn!(
                    group_name = %payload.group_name,
                    "webhook exceeded end-to-end timeout; processing continues in the background"
                );
                WebhookResponse::timed_out(&payload, start.elapsed())
            }
        }
    }

    async fn dispatch_inner(&self, payload: &WebhookPayload) -> WebhookResponse {
        let start = Instant::now();

        let (strategy, bindings) = match self.authenticate(payload).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(group_name = %payload.group_name, error = %e, "webhook rejected at authentication");
                return WebhookResponse::rejected(payload, &e, start.elapsed());
            }
        };

        let lock_keys: Vec<(Uuid, String)> = payload
            .orders
            .iter()
            .map(|o| (strategy.id, o.symbol.clone()))
            .collect();

        let guards = match self.locks.acquire_sorted(lock_keys).await {
            Ok(guards) => guards,
            Err(e) => {
                warn!(group_name = %payload.group_name, error = %e, "webhook rejected acquiring locks");
                return WebhookResponse::rejected(payload, &e, start.elapsed());
            }
        };
        let validation_elapsed = start.elapsed();

        let mut results = Vec::new();
        for order in &payload.orders {
            for binding in &bindings {
                let outcome = self.process_one(&strategy, order, binding).await;
                results.push(outcome);
            }
        }
        drop(guards);

        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;
        let success_rate = if results.is_empty() {
            0.0
        } else {
            successful as f64 / results.len() as f64
        };

        let response = WebhookResponse {
            success: failed == 0,
            action: payload.orders.first().map(|o| format!("{:?}", o.order_type)).unwrap_or_default(),
            strategy: strategy.group_name.clone(),
            message: if failed == 0 {
                "processed".to_string()
            } else {
                format!("{failed} of {} account(s) failed", results.len())
            },
            results,
            summary: Summary {
                total_accounts: bindings.len(),
                successful_orders: successful,
                failed_orders: failed,
                success_rate,
            },
            performance_metrics: PerformanceMetrics {
                total_ms: start.elapsed().as_millis(),
                validation_ms: validation_elapsed.as_millis(),
                execution_ms: start.elapsed().saturating_sub(validation_elapsed).as_millis(),
            },
        };

        info!(
            group_name = %payload.group_name,
            successful,
            failed,
            total_ms = response.performance_metrics.total_ms,
            "webhook processed"
        );
        response
    }

    /// Token auth (spec.md §4.8): `strategy.webhook_token` fans out to
    /// every active binding; a public strategy's per-binding
    /// `subscriber_token` authenticates exactly one.
    async fn authenticate(&self, payload: &WebhookPayload) -> Result<(Strategy, Vec<StrategyAccount>), WebhookError> {
        let strategy = self
            .strategies
            .find_by_group_name(&payload.group_name)
            .await?
            .ok_or_else(|| WebhookError::UnknownStrategy(payload.group_name.clone()))?;

        if !strategy.is_active {
            return Err(WebhookError::InactiveStrategy(payload.group_name.clone()));
        }

        if constant_time_eq(&payload.token, &strategy.webhook_token) {
            let bindings = self.strategies.active_bindings(strategy.id).await?;
            return Ok((strategy, bindings));
        }

        if strategy.is_public {
            if let Some(binding) = self
                .strategies
                .find_binding_by_subscriber_token(strategy.id, &payload.token)
                .await?
            {
                return Ok((strategy, vec![binding]));
            }
        }

        Err(WebhookError::InvalidToken)
    }

    async fn process_one(&self, strategy: &Strategy, order: &OrderSignal, binding: &StrategyAccount) -> AccountResult {
        match self.process_one_inner(strategy, order, binding).await {
            Ok(message) => AccountResult {
                account_id: binding.account_id,
                symbol: order.symbol.clone(),
                success: true,
                message,
            },
            Err(e) => {
                warn!(
                    account_id = %binding.account_id,
                    symbol = %order.symbol,
                    error = %e,
                    "webhook order failed for account"
                );
                AccountResult {
                    account_id: binding.account_id,
                    symbol: order.symbol.clone(),
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn process_one_inner(
        &self,
        strategy: &Strategy,
        order: &OrderSignal,
        binding: &StrategyAccount,
    ) -> Result<String, WebhookError> {
        let account = self
            .strategies
            .find_account(binding.account_id)
            .await?
            .ok_or_else(|| WebhookError::MalformedPayload(format!("account {} not found", binding.account_id)))?;

        let adapter = self
            .exchanges
            .get(&binding.account_id)
            .ok_or_else(|| WebhookError::MalformedPayload(format!("no adapter registered for account {}", binding.account_id)))?
            .clone();

        if order.order_type.is_cancel() {
            return self.process_cancel(order, binding, &account).await;
        }

        let domain_order_type = order
            .order_type
            .as_domain()
            .expect("non-cancel order types always map to a domain::OrderType");

        let capital = self.strategies.capital_for(binding.id).await?;
        let allocated = capital.map(|c: StrategyCapital| c.allocated_capital).unwrap_or(Decimal::ZERO);

        let price = match order.price {
            Some(p) => Some(p),
            None => self.prices.get_price(&account.exchange_name, account.market_type, &order.symbol).ok(),
        };

        let quantity = self.size_order(strategy, order, binding, &account, allocated, price).await?;
        if quantity <= Decimal::ZERO {
            return Err(WebhookError::MalformedPayload("computed order quantity is not positive".to_string()));
        }

        let limits = self
            .validator
            .limits_for(&account.exchange_name, account.market_type)
            .ok_or_else(|| WebhookError::MalformedPayload(format!("no exchange limits cached for {}", account.exchange_name)))?;
        let mut tx = self
            .orders
            .begin()
            .await
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
        let active_count = StrategyRepository::active_binding_count(&mut tx, binding.account_id)
            .await
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?
            .max(1) as usize;
        let bucket_limits = BucketLimits::from_exchange_limits(limits, active_count);

        let intent = Intent {
            strategy_account_id: binding.id,
            account_id: binding.account_id,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: domain_order_type,
            price,
            stop_price: order.stop_price,
            quantity,
            market_type: account.market_type,
            webhook_received_at: chrono::Utc::now(),
            priority: 0,
            sort_price: price.unwrap_or_default(),
        };

        let outcome = self
            .queue
            .enqueue(&mut tx, adapter.as_ref(), intent, bucket_limits)
            .await
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()));

        match outcome {
            Ok(EnqueueOutcome::Submitted(submitted)) => {
                tx.commit().await.map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
                Ok(format!("submitted order {}", submitted.id))
            }
            Ok(EnqueueOutcome::Queued(queued)) => {
                tx.commit().await.map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
                Ok(format!("queued pending order {}", queued.id))
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// `qty_per` > 0 sizes against allocated capital; negative closes the
    /// entire existing position at whatever quantity it currently holds
    /// (spec.md §6). FX conversion into the account's settlement currency
    /// fails closed per C3's contract, never synthesizing a rate.
    async fn size_order(
        &self,
        _strategy: &Strategy,
        order: &OrderSignal,
        binding: &StrategyAccount,
        _account: &Account,
        allocated_capital: Decimal,
        price: Option<Decimal>,
    ) -> Result<Decimal, WebhookError> {
        if order.qty_per < 0 {
            let mut tx = self
                .orders
                .begin()
                .await
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
            let position = crate::position::PositionReconciler::load_for_update(&mut tx, binding.id, &order.symbol)
                .await
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
            tx.rollback().await.map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
            return Ok(position.quantity.abs());
        }

        let Some(price) = price else {
            return Err(WebhookError::Price(crate::error::PriceCacheError::NoCachedPrice {
                exchange: order.exchange.clone(),
                symbol: order.symbol.clone(),
            }));
        };
        if price <= Decimal::ZERO {
            return Err(WebhookError::MalformedPayload("price must be positive for sizing".to_string()));
        }

        let mut notional = allocated_capital * binding.weight * Decimal::new(order.qty_per as i64, 2);
        if order.currency.eq_ignore_ascii_case("krw") {
            let rate = self.prices.get_usdt_krw_rate()?;
            notional /= rate;
        }
        Ok(notional / price)
    }

    /// `CANCEL` targets one (account, symbol) bucket; `CANCEL_ALL_ORDER`
    /// targets every live order on the account regardless of symbol.
    /// Both route through the same `cancel_queue` path as a
    /// rebalance-triggered cancel (spec.md §9 open-question decision).
    async fn process_cancel(
        &self,
        order: &OrderSignal,
        binding: &StrategyAccount,
        _account: &Account,
    ) -> Result<String, WebhookError> {
        let mut tx = self
            .orders
            .begin()
            .await
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let candidates = if order.order_type == WireOrderType::CancelAllOrder {
            self.orders
                .open_orders_for_account(&mut tx, binding.account_id)
                .await
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?
        } else {
            self.orders
                .open_orders_for_bucket(&mut tx, binding.account_id, &order.symbol)
                .await
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?
        };

        let mut queued = 0usize;
        for candidate in candidates
            .iter()
            .filter(|o| !o.status.is_terminal() && o.status != crate::domain::OrderStatus::Cancelling)
        {
            self.orders
                .mark_cancelling(&mut tx, candidate.id)
                .await
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
            CancelQueueRepository::insert(&mut tx, candidate.id, binding.strategy_id, binding.account_id)
                .await
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
            queued += 1;
        }

        tx.commit().await.map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;
        Ok(format!("queued {queued} order(s) for cancellation"))
    }
}

/// Wraps `subtle::ConstantTimeEq`: length differences leak nothing extra
/// since tokens are compared byte-for-byte only when lengths match, and a
/// length mismatch is itself not secret (spec.md §4.8 "constant-time
/// compare").
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_str_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
