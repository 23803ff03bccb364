//! CancelQueueWorker — drains `cancel_queue` (spec.md §4.7 step 1).
//!
//! A cancel already failed once before it lands here (C5's rebalance tried
//! it inline and gave up, or a prior poll of this worker retried and
//! failed). Every poll re-issues the RPC; `OrderNotFound` from the exchange
//! is treated as success (the order is already gone, which is the outcome
//! a cancel wants), not as a new failure to retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::OrderStatus;
use crate::error::RepositoryError;
use crate::exchange::ExchangeRegistry;
use crate::repository::{CancelQueueRepository, OrderRepository};

/// Seconds between polls of the table (spec.md §4.7: "its own poll interval
/// is part of its backoff" for the sibling failed-order queue; this worker
/// uses the same cadence since both share `max_retries = 5`).
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const BATCH_SIZE: i64 = 50;
const MAX_RETRY_DELAY_SECS: i64 = 3600;
const BASE_RETRY_DELAY_SECS: i64 = 60;

pub struct CancelQueueWorker {
    repository: Arc<OrderRepository>,
    exchanges: Arc<ExchangeRegistry>,
}

impl CancelQueueWorker {
    pub fn new(repository: Arc<OrderRepository>, exchanges: Arc<ExchangeRegistry>) -> Self {
        Self { repository, exchanges }
    }

    /// Runs until cancelled. Never returns `Err` — a single batch's
    /// database error is logged and the loop keeps polling, since this is
    /// one of `TradingSystem`'s supervised background tasks (SPEC_FULL.md
    /// §5.1) and a transient DB blip shouldn't tear it down.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.drain_batch().await {
                error!(error = %e, "cancel queue worker batch failed");
            }
        }
    }

    /// One-shot drain of a single batch, for `loom-admin`'s manual
    /// cancel-queue-drain command (SPEC_FULL.md §2.1). Returns the number
    /// of entries claimed and processed.
    pub async fn drain_once(&self) -> Result<usize, RepositoryError> {
        self.drain_batch().await
    }

    async fn drain_batch(&self) -> Result<usize, RepositoryError> {
        let mut tx = self.repository.begin().await?;
        let claimed = CancelQueueRepository::claim_due(&mut tx, BATCH_SIZE).await?;
        if claimed.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        let mut orders = HashMap::new();
        for entry in &claimed {
            if let Some(order) = self.repository.find_by_id(&mut tx, entry.order_id).await? {
                orders.insert(entry.order_id, order);
            }
        }
        tx.commit().await?;
        let len = claimed.len();

        for entry in claimed {
            let Some(order) = orders.get(&entry.order_id) else {
                // Order row already gone (terminal transition deleted it
                // out from under us) — nothing left to cancel.
                let mut tx = self.repository.begin().await?;
                CancelQueueRepository::mark_succeeded(&mut tx, entry.id).await?;
                tx.commit().await?;
                continue;
            };

            if order.status.is_terminal() {
                let mut tx = self.repository.begin().await?;
                CancelQueueRepository::mark_succeeded(&mut tx, entry.id).await?;
                tx.commit().await?;
                continue;
            }

            let Some(adapter) = self.exchanges.get(&entry.account_id) else {
                warn!(account_id = %entry.account_id, "no adapter registered for cancel queue entry's account");
                continue;
            };

            let mut tx = self.repository.begin().await?;
            match adapter.cancel_order(&order.symbol, &order.exchange_order_id).await {
                Ok(normalized) => {
                    self.repository
                        .transition(&mut tx, order.id, OrderStatus::Cancelled, Some(normalized.filled_quantity))
                        .await?;
                    CancelQueueRepository::mark_succeeded(&mut tx, entry.id).await?;
                }
                Err(e) if e.is_already_gone() => {
                    self.repository
                        .transition(&mut tx, order.id, OrderStatus::Cancelled, None)
                        .await?;
                    CancelQueueRepository::mark_succeeded(&mut tx, entry.id).await?;
                }
                Err(e) if e.is_retriable() => {
                    let retry_count = entry.retry_count + 1;
                    if retry_count >= entry.max_retries {
                        CancelQueueRepository::mark_exhausted(&mut tx, entry.id, &e.to_string()).await?;
                        error!(order_id = %order.id, "cancel queue entry exhausted retries");
                    } else {
                        let delay =
                            (BASE_RETRY_DELAY_SECS * 2i64.pow((retry_count - 1) as u32)).min(MAX_RETRY_DELAY_SECS);
                        let next_retry_at = Utc::now() + chrono::Duration::seconds(delay);
                        CancelQueueRepository::mark_failed_retry(&mut tx, entry.id, retry_count, next_retry_at, &e.to_string())
                            .await?;
                    }
                }
                Err(e) => {
                    // Non-retriable and not already-gone: auth failures,
                    // non-429 4xx. Retrying won't help; an operator needs
                    // to look at it.
                    CancelQueueRepository::mark_exhausted(&mut tx, entry.id, &e.to_string()).await?;
                    error!(order_id = %order.id, error = %e, "cancel rejected non-retriably");
                }
            }
            tx.commit().await?;
            debug!(order_id = %order.id, "cancel queue entry processed");
        }

        Ok(len)
    }
}
