//! spec.md §8 scenario 1 "Overflow queueing": an exchange limit of 3 stop
//! orders, 5 intents enqueued at priorities {10, 5, 5, 1, 20}. Slots are
//! handed out first-come-first-served at enqueue time (`enqueue` only asks
//! "is there a free slot right now"); once one of the three live orders
//! fills and its row is deleted, `rebalance` promotes the highest-priority
//! (lowest value) remaining pending row into the freed slot without
//! touching the two still-live orders.

mod common;

use std::sync::Arc;

use loom_core::domain::{MarketType, OrderMappingCache, OrderStatus, OrderType, Side};
use loom_core::queue::{BucketLimits, EnqueueOutcome, Intent, OrderQueueManager};
use loom_core::repository::OrderRepository;
use loom_core::validation::symbol_validator::SymbolInfo;
use loom_core::validation::SymbolValidator;
use loom_exchanges::mock::{MockExchangeAdapter, MockExchangeConfig};
use rust_decimal_macros::dec;
use sqlx::PgPool;

fn intent(fixture: &common::Fixture, priority: i32, offset_secs: i64) -> Intent {
    Intent {
        strategy_account_id: fixture.strategy_account_id,
        account_id: fixture.account_id,
        symbol: "BTC/USDT".to_string(),
        side: Side::Sell,
        order_type: OrderType::StopMarket,
        price: Some(dec!(49000)),
        stop_price: Some(dec!(49000)),
        quantity: dec!(1),
        market_type: MarketType::Spot,
        webhook_received_at: common::ts(100 - offset_secs),
        priority,
        sort_price: dec!(49000),
    }
}

fn validator() -> Arc<SymbolValidator> {
    let validator = SymbolValidator::new();
    validator.upsert(
        "mock",
        "BTC/USDT",
        MarketType::Spot,
        SymbolInfo {
            min_qty: dec!(0.001),
            max_qty: dec!(1000),
            step_size: dec!(0.001),
            tick_size: dec!(0.01),
            min_notional: dec!(1),
            price_precision: 2,
            amount_precision: 3,
            refreshable: false,
            fetched_at: std::time::Instant::now(),
        },
    );
    Arc::new(validator)
}

#[sqlx::test(migrations = "./migrations")]
async fn fill_promotes_highest_priority_pending_without_disturbing_others(pool: PgPool) {
    let fixture = common::seed_binding(&pool, "mock").await;
    let repository = Arc::new(OrderRepository::new(pool.clone()));
    let mapping_cache = Arc::new(OrderMappingCache::with_default_ttl());
    let manager = OrderQueueManager::new(repository.clone(), validator(), mapping_cache);
    let adapter = MockExchangeAdapter::new(MockExchangeConfig {
        fill_immediately: false,
        ..MockExchangeConfig::new("mock")
    });

    let limits = BucketLimits {
        max_open_orders: 10,
        max_stop_orders: 3,
    };

    let priorities = [(10, 0), (5, 1), (5, 2), (1, 3), (20, 4)];
    let mut submitted = Vec::new();
    let mut queued = Vec::new();
    for (priority, offset) in priorities {
        let mut tx = repository.begin().await.unwrap();
        let outcome = manager
            .enqueue(&mut tx, adapter.as_ref(), intent(&fixture, priority, offset), limits)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        match outcome {
            EnqueueOutcome::Submitted(order) => submitted.push((priority, order)),
            EnqueueOutcome::Queued(pending) => queued.push((priority, pending)),
        }
    }

    // First three arrivals (priorities 10, 5, 5) claimed the free slots;
    // the last two (priorities 1, 20) queued behind them.
    assert_eq!(submitted.len(), 3);
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().any(|(p, _)| *p == 1));
    assert!(queued.iter().any(|(p, _)| *p == 20));

    let filled = submitted
        .iter()
        .find(|(priority, _)| *priority == 10)
        .map(|(_, order)| order.clone())
        .expect("priority-10 order was submitted");

    let mut tx = repository.begin().await.unwrap();
    repository
        .transition(&mut tx, filled.id, OrderStatus::Filled, Some(filled.quantity))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let strategy_id = fixture.strategy_id;
    let mut tx = repository.begin().await.unwrap();
    let report = manager
        .rebalance(&mut tx, adapter.as_ref(), strategy_id, fixture.account_id, "BTC/USDT", limits)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(report.cancelled, 0, "the two remaining live orders must not be touched");
    assert_eq!(report.promoted, 1, "exactly one pending row should fill the freed slot");

    let mut tx = repository.begin().await.unwrap();
    let open = repository
        .open_orders_for_bucket(&mut tx, fixture.account_id, "BTC/USDT")
        .await
        .unwrap();
    let pending = repository
        .pending_orders_for_bucket(&mut tx, fixture.account_id, "BTC/USDT")
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(open.len(), 3);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].priority, 20, "only the lower-priority pending row should remain queued");

    // Rebalancing again with the bucket already converged changes nothing.
    let mut tx = repository.begin().await.unwrap();
    let second = manager
        .rebalance(&mut tx, adapter.as_ref(), strategy_id, fixture.account_id, "BTC/USDT", limits)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(second.cancelled, 0);
    assert_eq!(second.promoted, 0);
}
