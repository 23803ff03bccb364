//! spec.md §8 scenario 2 "Racing WS fill": the private-stream event for a
//! fill can arrive before the order's create-REST response is even
//! persisted in some deployments, but here it races the monitor's own
//! confirm-over-REST step instead. Either way exactly one `Trade` row must
//! land, the position must reflect it, and the freed slot must be
//! rebalanced — never a duplicate, never a lost fill.

mod common;

use std::sync::Arc;
use std::time::Duration;

use loom_core::domain::{MarketType, OrderMappingCache, OrderType, Side};
use loom_core::exchange::ExchangeAdapter;
use loom_core::fill_monitor::{KeepAlive, OrderFillMonitor};
use loom_core::queue::{BucketLimits, EnqueueOutcome, Intent, OrderQueueManager};
use loom_core::repository::{OrderRepository, TradeRepository};
use loom_core::validation::symbol_validator::{ExchangeLimits, SymbolInfo};
use loom_core::validation::SymbolValidator;
use loom_exchanges::mock::{MockExchangeAdapter, MockExchangeConfig};
use rust_decimal_macros::dec;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
async fn racing_fill_produces_exactly_one_trade_and_rebalances(pool: PgPool) {
    let fixture = common::seed_binding(&pool, "mock").await;
    let repository = Arc::new(OrderRepository::new(pool.clone()));
    let mapping_cache = Arc::new(OrderMappingCache::with_default_ttl());

    let validator = Arc::new(SymbolValidator::new());
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
    validator.upsert_limits(
        "mock",
        MarketType::Spot,
        ExchangeLimits {
            max_open_orders: 3,
            max_stop_orders: 3,
        },
    );

    let manager = Arc::new(OrderQueueManager::new(repository.clone(), validator.clone(), mapping_cache.clone()));
    let adapter = MockExchangeAdapter::new(MockExchangeConfig {
        fill_immediately: false,
        ..MockExchangeConfig::new("mock")
    });

    let limits = BucketLimits {
        max_open_orders: 3,
        max_stop_orders: 3,
    };

    let intent = Intent {
        strategy_account_id: fixture.strategy_account_id,
        account_id: fixture.account_id,
        symbol: "BTC/USDT".to_string(),
        side: Side::Buy,
        order_type: OrderType::Limit,
        price: Some(dec!(50000)),
        stop_price: None,
        quantity: dec!(1),
        market_type: MarketType::Spot,
        webhook_received_at: common::ts(10),
        priority: 0,
        sort_price: dec!(50000),
    };

    let mut tx = repository.begin().await.unwrap();
    let outcome = manager.enqueue(&mut tx, adapter.as_ref(), intent, limits).await.unwrap();
    tx.commit().await.unwrap();
    let order = match outcome {
        EnqueueOutcome::Submitted(order) => order,
        EnqueueOutcome::Queued(_) => panic!("bucket had a free slot, order should have submitted"),
    };

    let dyn_adapter: Arc<dyn ExchangeAdapter> = adapter.clone();
    let monitor = Arc::new(OrderFillMonitor::new(
        fixture.account_id,
        dyn_adapter,
        repository.clone(),
        validator.clone(),
        manager.clone(),
        mapping_cache.clone(),
        KeepAlive::bybit_style(),
    ));
    let monitor_handle = tokio::spawn(monitor.clone().run());

    // Let the monitor finish opening its private stream before the fill
    // event is emitted, so it isn't dropped on the floor waiting for a
    // subscriber (the mock's broadcast channel has no replay buffer).
    tokio::time::sleep(Duration::from_millis(50)).await;
    adapter.fill(&order.exchange_order_id, dec!(50000), dec!(0.05));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut trade_landed = false;
    while tokio::time::Instant::now() < deadline {
        let mut tx = repository.begin().await.unwrap();
        let exists = TradeRepository::exists(&mut tx, &order.exchange_order_id).await.unwrap();
        tx.rollback().await.unwrap();
        if exists {
            trade_landed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    monitor_handle.abort();

    assert!(trade_landed, "fill was never reconciled into a trade row within the deadline");

    let mut tx = repository.begin().await.unwrap();
    let still_open = repository
        .open_orders_for_bucket(&mut tx, fixture.account_id, "BTC/USDT")
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    assert!(still_open.is_empty(), "filled order's row should have been deleted on terminal transition");

    let position: (rust_decimal::Decimal, rust_decimal::Decimal) = sqlx::query_as(
        "SELECT quantity, entry_price FROM strategy_positions WHERE strategy_account_id = $1 AND symbol = $2",
    )
    .bind(fixture.strategy_account_id)
    .bind("BTC/USDT")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(position.0, dec!(1));
    assert_eq!(position.1, dec!(50000));

    let trade_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades WHERE exchange_order_id = $1")
        .bind(&order.exchange_order_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(trade_count.0, 1, "exactly one trade row, never a duplicate from a WS/REST race");
}
