//! OrderQueueManager (C5) — per-(account, symbol) priority queue with
//! transactional rebalance under exchange open-order limits (spec.md §4.5).
//!
//! `OrderQueueManager` exclusively owns `PendingOrder` row transitions
//! (spec.md §3); `OpenOrder` transitions it makes (submit, mark-cancelling)
//! still go through [`OrderRepository`] so the terminal-transition guard
//! stays centralized there.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{OpenOrder, OperationType, OrderMappingCache, OrderParams, PendingOrder};
use crate::error::Error;
use crate::exchange::{CreateOrderRequest, ExchangeAdapter};
use crate::repository::{CancelQueueRepository, FailedOrderRepository, OrderRepository, Tx};
use crate::validation::SymbolValidator;

use super::intent::{BucketLimits, EnqueueOutcome, Intent};

#[derive(Debug, Clone, Default)]
pub struct RebalanceReport {
    pub cancelled: usize,
    pub promoted: usize,
    pub rejected: usize,
}

pub struct OrderQueueManager {
    repository: Arc<OrderRepository>,
    validator: Arc<SymbolValidator>,
    mapping_cache: Arc<OrderMappingCache>,
    bucket_locks: DashMap<(Uuid, String), Arc<Mutex<()>>>,
}

/// A bucket member pending sort, whichever table it currently lives in.
enum BucketEntry {
    Open(OpenOrder),
    Pending(PendingOrder),
}

impl BucketEntry {
    fn sort_key(&self) -> (i32, rust_decimal::Decimal, DateTime<Utc>, Uuid) {
        match self {
            BucketEntry::Open(o) => (o.priority, o.sort_price, o.webhook_received_at, o.id),
            BucketEntry::Pending(p) => (p.priority, p.sort_price, p.webhook_received_at, p.id),
        }
    }

    fn is_stop(&self) -> bool {
        match self {
            BucketEntry::Open(o) => o.order_type.is_stop(),
            BucketEntry::Pending(p) => p.order_type.is_stop(),
        }
    }
}

impl OrderQueueManager {
    pub fn new(
        repository: Arc<OrderRepository>,
        validator: Arc<SymbolValidator>,
        mapping_cache: Arc<OrderMappingCache>,
    ) -> Self {
        Self {
            repository,
            validator,
            mapping_cache,
            bucket_locks: DashMap::new(),
        }
    }

    /// Held only for the duration of the DB work that touches a bucket
    /// (spec.md §5 "locking/serialization policy").
    pub async fn lock_bucket(&self, account_id: Uuid, symbol: &str) -> OwnedMutexGuard<()> {
        let key = (account_id, symbol.to_string());
        let mutex = self
            .bucket_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// `enqueue` per spec.md §4.5: validate, count live orders under lock,
    /// submit immediately if a slot is free, else queue.
    pub async fn enqueue(
        &self,
        tx: &mut Tx<'_>,
        adapter: &dyn ExchangeAdapter,
        intent: Intent,
        limits: BucketLimits,
    ) -> Result<EnqueueOutcome, Error> {
        let adjusted = self.validator.validate_order(
            adapter.exchange_name(),
            &intent.symbol,
            intent.market_type,
            intent.quantity,
            intent.price,
        )?;

        let open_orders = self
            .repository
            .open_orders_for_bucket(tx, intent.account_id, &intent.symbol)
            .await
            .map_err(Error::from)?;

        let current_total = open_orders.len();
        let current_stop = open_orders.iter().filter(|o| o.order_type.is_stop()).count();
        let is_stop = intent.order_type.is_stop();

        // Mirrors `exchange_limit_tracker.py`'s `can_place_order`: a slot is
        // free only if the total ceiling has room, and — for a stop order —
        // the stop sub-ceiling has room too. A non-stop order never checks
        // `current_stop` at all.
        let slot_free = current_total < limits.total_top_k() && (!is_stop || current_stop < limits.stop_top_k());

        if slot_free {
            let normalized = adapter
                .create_order(CreateOrderRequest {
                    symbol: intent.symbol.clone(),
                    side: intent.side,
                    order_type: intent.order_type,
                    quantity: adjusted.adjusted_qty,
                    price: adjusted.adjusted_price,
                    stop_price: intent.stop_price,
                    market_type: intent.market_type,
                    params: serde_json::Value::Null,
                })
                .await?;

            let order = self
                .repository
                .create_open_order(
                    tx,
                    intent.strategy_account_id,
                    intent.account_id,
                    &normalized.exchange_order_id,
                    &intent.symbol,
                    intent.side,
                    intent.order_type,
                    adjusted.adjusted_price,
                    intent.stop_price,
                    adjusted.adjusted_qty,
                    intent.market_type,
                    intent.webhook_received_at,
                    intent.priority,
                    intent.sort_price,
                )
                .await?;

            self.mapping_cache.register(
                order.exchange_order_id.clone(),
                intent.account_id,
                adapter.exchange_name(),
                intent.market_type,
                order.symbol.clone(),
            );

            info!(
                order_id = %order.id,
                exchange_order_id = %order.exchange_order_id,
                symbol = %order.symbol,
                "submitted order immediately, slot was free"
            );
            Ok(EnqueueOutcome::Submitted(order))
        } else {
            let pending = PendingOrder {
                id: Uuid::new_v4(),
                account_id: intent.account_id,
                strategy_account_id: intent.strategy_account_id,
                symbol: intent.symbol.clone(),
                side: intent.side,
                order_type: intent.order_type,
                price: adjusted.adjusted_price,
                stop_price: intent.stop_price,
                quantity: adjusted.adjusted_qty,
                priority: intent.priority,
                sort_price: intent.sort_price,
                market_type: intent.market_type,
                webhook_received_at: intent.webhook_received_at,
                retry_count: 0,
                reason: None,
            };
            self.repository.insert_pending_order(tx, &pending).await?;
            Ok(EnqueueOutcome::Queued(pending))
        }
    }

    /// Recomputes the top-K for `(account_id, symbol)` and converges live
    /// orders to match it. Idempotent: calling this twice in a row on an
    /// unchanged bucket is a no-op the second time (spec.md §8 property).
    pub async fn rebalance(
        &self,
        tx: &mut Tx<'_>,
        adapter: &dyn ExchangeAdapter,
        strategy_id: Uuid,
        account_id: Uuid,
        symbol: &str,
        limits: BucketLimits,
    ) -> Result<RebalanceReport, Error> {
        let open_orders = self
            .repository
            .open_orders_for_bucket(tx, account_id, symbol)
            .await?;
        let pending_orders = self
            .repository
            .pending_orders_for_bucket(tx, account_id, symbol)
            .await?;

        let mut entries: Vec<BucketEntry> = Vec::with_capacity(open_orders.len() + pending_orders.len());
        entries.extend(open_orders.into_iter().map(BucketEntry::Open));
        entries.extend(pending_orders.into_iter().map(BucketEntry::Pending));
        entries.sort_by(|a, b| compare_keys(&a.sort_key(), &b.sort_key()));

        let should_live = admit_in_priority_order(&entries, limits);
        let mut report = RebalanceReport::default();

        for (entry, live) in entries.into_iter().zip(should_live) {
            match (entry, live) {
                (BucketEntry::Open(order), false) => {
                    // Already has a cancel in flight: re-issuing here would
                    // insert a second `cancel_queue` row for the same order
                    // on every repeated rebalance, which breaks the
                    // idempotent-rebalance property (spec.md §8) while the
                    // worker drains the first one.
                    if order.status != crate::domain::OrderStatus::Cancelling {
                        self.repository.mark_cancelling(tx, order.id).await?;
                        CancelQueueRepository::insert(tx, order.id, strategy_id, account_id).await?;
                        report.cancelled += 1;
                    }
                }
                (BucketEntry::Open(_), true) => {
                    // Already live and within both ceilings: no-op.
                }
                (BucketEntry::Pending(pending), true) => {
                    match self.promote(tx, adapter, pending.clone()).await {
                        Ok(true) => report.promoted += 1,
                        Ok(false) => report.rejected += 1,
                        Err(e) => return Err(e),
                    }
                }
                (BucketEntry::Pending(_), false) => {
                    // Stays queued.
                }
            }
        }

        Ok(report)
    }

    /// Submits a queued row to the exchange. Returns `Ok(true)` on
    /// promotion, `Ok(false)` if the exchange rejected it (routed to
    /// `FailedOrder`, not re-queued), `Err` only for retriable infra
    /// failures that should abort and roll back the whole rebalance.
    async fn promote(
        &self,
        tx: &mut Tx<'_>,
        adapter: &dyn ExchangeAdapter,
        pending: PendingOrder,
    ) -> Result<bool, Error> {
        let result = adapter
            .create_order(CreateOrderRequest {
                symbol: pending.symbol.clone(),
                side: pending.side,
                order_type: pending.order_type,
                quantity: pending.quantity,
                price: pending.price,
                stop_price: pending.stop_price,
                market_type: pending.market_type,
                params: serde_json::Value::Null,
            })
            .await;

        match result {
            Ok(normalized) => {
                self.repository.delete_pending_order(tx, pending.id).await?;
                self.repository
                    .create_open_order(
                        tx,
                        pending.strategy_account_id,
                        pending.account_id,
                        &normalized.exchange_order_id,
                        &pending.symbol,
                        pending.side,
                        pending.order_type,
                        pending.price,
                        pending.stop_price,
                        pending.quantity,
                        pending.market_type,
                        pending.webhook_received_at,
                        pending.priority,
                        pending.sort_price,
                    )
                    .await?;
                self.mapping_cache.register(
                    normalized.exchange_order_id,
                    pending.account_id,
                    adapter.exchange_name(),
                    pending.market_type,
                    pending.symbol.clone(),
                );
                Ok(true)
            }
            Err(e) if e.is_retriable() => Err(Error::Exchange(e)),
            Err(e) => {
                let error_text = e.to_string();
                warn!(
                    pending_id = %pending.id,
                    error = %error_text,
                    "exchange rejected promoted order; routing to failed_orders"
                );
                self.repository.delete_pending_order(tx, pending.id).await?;
                FailedOrderRepository::insert(
                    tx,
                    OperationType::Create,
                    pending.strategy_account_id,
                    OrderParams {
                        symbol: pending.symbol.clone(),
                        side: pending.side,
                        order_type: pending.order_type,
                        quantity: pending.quantity,
                        price: pending.price,
                        stop_price: pending.stop_price,
                        market_type: pending.market_type,
                    },
                    "exchange rejected promotion",
                    Some(error_text.as_str()),
                    None,
                )
                .await?;
                Ok(false)
            }
        }
    }

    pub fn needs_refresh_interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Shared with every account's `OrderFillMonitor` (C6), so a fill that
    /// races ahead of this transaction's commit still resolves.
    pub fn mapping_cache(&self) -> Arc<OrderMappingCache> {
        self.mapping_cache.clone()
    }
}

fn compare_keys(
    a: &(i32, rust_decimal::Decimal, DateTime<Utc>, Uuid),
    b: &(i32, rust_decimal::Decimal, DateTime<Utc>, Uuid),
) -> Ordering {
    a.0.cmp(&b.0)
        .then(a.1.cmp(&b.1))
        .then(a.2.cmp(&b.2))
        .then(a.3.cmp(&b.3))
}

/// Decides, for a bucket already sorted in priority order, which entries
/// should be live. Two independent ceilings, not one (spec.md §8:
/// "count(OpenOrder) ≤ per_symbol_limit ∧ count(OpenOrder where type is
/// STOP) ≤ stop_limit"). Walking the bucket once and admitting each entry
/// only if both running counts still have room is the same check
/// `exchange_limit_tracker.py`'s `can_place_order` does per-call, applied
/// across the whole sorted bucket in one pass: since every stop order also
/// counts against the total ceiling, checking both before admitting an
/// entry can never let either cap slip, regardless of how stop and
/// non-stop entries interleave.
fn admit_in_priority_order(entries: &[BucketEntry], limits: BucketLimits) -> Vec<bool> {
    let total_cap = limits.total_top_k();
    let stop_cap = limits.stop_top_k();
    let mut live_total = 0usize;
    let mut live_stop = 0usize;
    entries
        .iter()
        .map(|entry| {
            let is_stop = entry.is_stop();
            let fits = live_total < total_cap && (!is_stop || live_stop < stop_cap);
            if fits {
                live_total += 1;
                if is_stop {
                    live_stop += 1;
                }
            }
            fits
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn ordering_prefers_lower_priority_then_sort_price_then_time_then_id() {
        let low_id = Uuid::from_u128(1);
        let high_id = Uuid::from_u128(2);

        let a = (1, dec!(10), ts(100), low_id);
        let b = (1, dec!(10), ts(100), high_id);
        let c = (0, dec!(999), ts(999), low_id);

        assert_eq!(compare_keys(&a, &b), Ordering::Less);
        assert_eq!(compare_keys(&c, &a), Ordering::Less);
    }

    fn pending_entry(order_type: crate::domain::OrderType, priority: i32) -> BucketEntry {
        BucketEntry::Pending(PendingOrder {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            strategy_account_id: Uuid::new_v4(),
            symbol: "BTC/USDT".to_string(),
            side: crate::domain::Side::Sell,
            order_type,
            price: Some(dec!(49000)),
            stop_price: Some(dec!(49000)),
            quantity: dec!(1),
            priority,
            sort_price: dec!(49000),
            market_type: crate::domain::MarketType::Spot,
            webhook_received_at: ts(0),
            retry_count: 0,
            reason: None,
        })
    }

    fn open_entry(order_type: crate::domain::OrderType, priority: i32) -> BucketEntry {
        BucketEntry::Open(OpenOrder {
            id: Uuid::new_v4(),
            strategy_account_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            exchange_order_id: Uuid::new_v4().to_string(),
            symbol: "BTC/USDT".to_string(),
            side: crate::domain::Side::Sell,
            order_type,
            price: Some(dec!(49000)),
            stop_price: Some(dec!(49000)),
            quantity: dec!(1),
            filled_quantity: rust_decimal::Decimal::ZERO,
            status: crate::domain::OrderStatus::Open,
            market_type: crate::domain::MarketType::Spot,
            priority,
            sort_price: dec!(49000),
            webhook_received_at: ts(0),
            is_processing: false,
            processing_started_at: None,
            error_message: None,
            cancel_attempted_at: None,
            created_at: ts(0),
        })
    }

    /// Regression for the single-ceiling bug: a non-stop fill recomputes
    /// `BucketLimits` with `max_open_orders=10` headroom, but three stop
    /// orders are already live against `max_stop_orders=3`. A pending
    /// fourth stop order must stay queued even though the total count
    /// (3 live + itself = 4) is nowhere near the 10-order ceiling.
    #[test]
    fn stop_ceiling_caps_promotion_even_with_total_headroom() {
        use crate::domain::OrderType;

        let limits = BucketLimits {
            max_open_orders: 10,
            max_stop_orders: 3,
        };
        let entries = vec![
            open_entry(OrderType::StopMarket, 1),
            open_entry(OrderType::StopMarket, 2),
            open_entry(OrderType::StopMarket, 3),
            pending_entry(OrderType::StopMarket, 4),
        ];

        let should_live = admit_in_priority_order(&entries, limits);
        assert_eq!(should_live, vec![true, true, true, false], "4th stop order must stay queued");
    }

    /// Mirror-image bug: a stop intent queued behind five live limit
    /// orders must promote because its 3 stop slots are all free, even
    /// though `count(open) == 5` would have wrongly gated it against a
    /// single collapsed `top_k` of 3.
    #[test]
    fn stop_order_promotes_despite_bucket_already_holding_five_non_stop_orders() {
        use crate::domain::OrderType;

        let limits = BucketLimits {
            max_open_orders: 10,
            max_stop_orders: 3,
        };
        let entries = vec![
            open_entry(OrderType::Limit, 1),
            open_entry(OrderType::Limit, 2),
            open_entry(OrderType::Limit, 3),
            open_entry(OrderType::Limit, 4),
            open_entry(OrderType::Limit, 5),
            pending_entry(OrderType::StopMarket, 6),
        ];

        let should_live = admit_in_priority_order(&entries, limits);
        assert_eq!(should_live, vec![true, true, true, true, true, true]);
    }

    /// With independent headroom on both ceilings, a queued stop order is
    /// promoted without disturbing already-live non-stop orders.
    #[test]
    fn stop_order_promotes_when_both_ceilings_have_room() {
        use crate::domain::OrderType;

        let limits = BucketLimits {
            max_open_orders: 10,
            max_stop_orders: 3,
        };
        let entries = vec![
            open_entry(OrderType::Limit, 1),
            open_entry(OrderType::Limit, 2),
            pending_entry(OrderType::StopMarket, 3),
        ];

        let should_live = admit_in_priority_order(&entries, limits);
        assert_eq!(should_live, vec![true, true, true]);
    }

    #[tokio::test]
    async fn bucket_lock_serializes_same_key() {
        let manager = OrderQueueManager::new(
            Arc::new(OrderRepository::new_unconnected_for_test()),
            Arc::new(SymbolValidator::new()),
            Arc::new(OrderMappingCache::with_default_ttl()),
        );
        let account = Uuid::new_v4();
        let guard1 = manager.lock_bucket(account, "BTC/USDT").await;
        drop(guard1);
        let _guard2 = manager.lock_bucket(account, "BTC/USDT").await;
    }

    fn arb_sort_key() -> impl Strategy<Value = (i32, rust_decimal::Decimal, DateTime<Utc>, Uuid)> {
        (0i32..50, 0i64..1_000_000, 0i64..1_000_000, 0u128..1_000_000).prop_map(|(priority, price, secs, id)| {
            (priority, rust_decimal::Decimal::from(price), ts(secs), Uuid::from_u128(id))
        })
    }

    proptest! {
        /// Sorting a bucket by `compare_keys` is idempotent: re-sorting an
        /// already-sorted sequence changes nothing (spec.md §8 testable
        /// property "rebalance on an unchanged bucket is a no-op").
        #[test]
        fn sorting_by_compare_keys_is_idempotent(mut keys in proptest::collection::vec(arb_sort_key(), 0..30)) {
            keys.sort_by(compare_keys);
            let once = keys.clone();
            keys.sort_by(compare_keys);
            prop_assert_eq!(once, keys);
        }

        /// `compare_keys` is antisymmetric: swapping the arguments reverses
        /// a strict ordering and never turns a `Less` into something other
        /// than `Greater`.
        #[test]
        fn compare_keys_is_antisymmetric(a in arb_sort_key(), b in arb_sort_key()) {
            let forward = compare_keys(&a, &b);
            let backward = compare_keys(&b, &a);
            prop_assert_eq!(forward.reverse(), backward);
        }

        /// Lower priority always outranks higher priority regardless of
        /// the other fields (spec.md §4.5: priority is the primary sort
        /// key).
        #[test]
        fn lower_priority_always_sorts_first(
            (price_a, time_a, id_a) in (0i64..1000, 0i64..1000, 0u128..1000),
            (price_b, time_b, id_b) in (0i64..1000, 0i64..1000, 0u128..1000),
            priority_a in 0i32..50,
            gap in 1i32..50,
        ) {
            let a = (priority_a, rust_decimal::Decimal::from(price_a), ts(time_a), Uuid::from_u128(id_a));
            let b = (priority_a + gap, rust_decimal::Decimal::from(price_b), ts(time_b), Uuid::from_u128(id_b));
            prop_assert_eq!(compare_keys(&a, &b), Ordering::Less);
        }
    }
}
