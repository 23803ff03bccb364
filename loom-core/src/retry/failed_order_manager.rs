//! FailedOrderManager (C7) — drains `failed_orders` (spec.md §4.7 step 2).
//!
//! Shares `CancelQueueWorker`'s shape (claim under `FOR UPDATE SKIP
//! LOCKED`, dispatch, classify, write back in a short follow-up
//! transaction) but the two operation types resolve differently: CREATE
//! replays the saved order params through the exchange; CANCEL re-checks
//! whether the original order is even still open before touching the
//! exchange at all.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::domain::{OperationType, OrderStatus};
use crate::error::RepositoryError;
use crate::exchange::{CreateOrderRequest, ExchangeRegistry};
use crate::repository::{FailedOrderRepository, OrderRepository, StrategyRepository};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const BATCH_SIZE: i64 = 50;

pub struct FailedOrderManager {
    repository: Arc<OrderRepository>,
    exchanges: Arc<ExchangeRegistry>,
}

impl FailedOrderManager {
    pub fn new(repository: Arc<OrderRepository>, exchanges: Arc<ExchangeRegistry>) -> Self {
        Self { repository, exchanges }
    }

    /// Runs until cancelled. Same "never die on a batch error" contract as
    /// `CancelQueueWorker::run` — this is one of `TradingSystem`'s
    /// supervised background tasks.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.drain_batch().await {
                error!(error = %e, "failed order manager batch failed");
            }
        }
    }

    /// One-shot drain of a single batch, for `loom-admin`'s manual
    /// failed-order-drain command (SPEC_FULL.md §2.1). Returns the number
    /// of entries claimed and processed.
    pub async fn drain_once(&self) -> Result<usize, RepositoryError> {
        self.drain_batch().await
    }

    async fn drain_batch(&self) -> Result<usize, RepositoryError> {
        let mut tx = self.repository.begin().await?;
        let claimed = FailedOrderRepository::claim_due(&mut tx, BATCH_SIZE).await?;
        if claimed.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }
        tx.commit().await?;
        let len = claimed.len();

        for entry in claimed {
            if entry.retry_count >= crate::domain::FailedOrder::MAX_RETRIES {
                let mut tx = self.repository.begin().await?;
                FailedOrderRepository::mark_removed(&mut tx, entry.id).await?;
                tx.commit().await?;
                error!(failed_order_id = %entry.id, "failed order retry record exhausted retries");
                continue;
            }

            let mut tx = self.repository.begin().await?;
            let account_id = StrategyRepository::account_id_for_binding(&mut tx, entry.strategy_account_id).await?;
            tx.rollback().await?;

            let Some(adapter) = self.exchanges.get(&account_id) else {
                warn!(account_id = %account_id, "no adapter registered for failed order retry's account");
                continue;
            };

            match entry.operation_type {
                OperationType::Create => {
                    let request = CreateOrderRequest {
                        symbol: entry.order_params.symbol.clone(),
                        side: entry.order_params.side,
                        order_type: entry.order_params.order_type,
                        quantity: entry.order_params.quantity,
                        price: entry.order_params.price,
                        stop_price: entry.order_params.stop_price,
                        market_type: entry.order_params.market_type,
                        params: serde_json::Value::Null,
                    };

                    let mut tx = self.repository.begin().await?;
                    match adapter.create_order(request).await {
                        Ok(_normalized) => {
                            FailedOrderRepository::mark_removed(&mut tx, entry.id).await?;
                            debug!(failed_order_id = %entry.id, "failed create order retry succeeded");
                        }
                        Err(e) if e.is_retriable() => {
                            FailedOrderRepository::increment_retry(&mut tx, entry.id, Some(&e.to_string())).await?;
                        }
                        Err(e) => {
                            // Non-retriable: the exchange rejected the replay
                            // outright (bad symbol, insufficient balance, auth).
                            // Retrying identical params won't change the outcome.
                            FailedOrderRepository::mark_removed(&mut tx, entry.id).await?;
                            error!(failed_order_id = %entry.id, error = %e, "create retry rejected non-retriably, dropping");
                        }
                    }
                    tx.commit().await?;
                }
                OperationType::Cancel => {
                    let mut tx = self.repository.begin().await?;
                    let original = match entry.original_order_id {
                        Some(order_id) => self.repository.find_by_id(&mut tx, order_id).await?,
                        None => None,
                    };

                    let Some(order) = original else {
                        // Nothing left to cancel: already gone, or we never
                        // had the id. Either way the cancel's goal is met.
                        FailedOrderRepository::mark_completed(&mut tx, entry.id).await?;
                        tx.commit().await?;
                        continue;
                    };

                    if order.status.is_terminal() {
                        FailedOrderRepository::mark_completed(&mut tx, entry.id).await?;
                        tx.commit().await?;
                        continue;
                    }
                    tx.rollback().await?;

                    let mut tx = self.repository.begin().await?;
                    match adapter.cancel_order(&order.symbol, &order.exchange_order_id).await {
                        Ok(normalized) => {
                            self.repository
                                .transition(&mut tx, order.id, OrderStatus::Cancelled, Some(normalized.filled_quantity))
                                .await?;
                            FailedOrderRepository::mark_completed(&mut tx, entry.id).await?;
                        }
                        Err(e) if e.is_already_gone() => {
                            self.repository
                                .transition(&mut tx, order.id, OrderStatus::Cancelled, None)
                                .await?;
                            FailedOrderRepository::mark_completed(&mut tx, entry.id).await?;
                        }
                        Err(e) if e.is_retriable() => {
                            FailedOrderRepository::increment_retry(&mut tx, entry.id, Some(&e.to_string())).await?;
                        }
                        Err(e) => {
                            FailedOrderRepository::mark_removed(&mut tx, entry.id).await?;
                            error!(failed_order_id = %entry.id, error = %e, "cancel retry rejected non-retriably, dropping");
                        }
                    }
                    tx.commit().await?;
                }
            }

            debug!(failed_order_id = %entry.id, status = ?entry.status, "failed order retry processed");
        }

        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_retries_matches_domain_constant() {
        assert_eq!(crate::domain::FailedOrder::MAX_RETRIES, 5);
    }
}
