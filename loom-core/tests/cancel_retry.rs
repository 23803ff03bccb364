//! spec.md §8 scenario 3 "Cancel retry backoff": the exchange returns a
//! retriable 503 for a cancel twice before it succeeds on the third try.
//! `CancelQueueWorker` must back off 60s then 120s between attempts
//! (`60 * 2^(retry_count-1)`, capped at 3600s) and leave the order
//! `CANCELLING` until the cancel actually lands, at which point the row is
//! deleted (terminal transition) and the queue entry marked `SUCCESS`.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use loom_core::domain::{MarketType, OrderType, Side};
use loom_core::exchange::{CreateOrderRequest, ExchangeAdapter, ExchangeRegistry};
use loom_core::repository::{CancelQueueRepository, OrderRepository};
use loom_core::retry::CancelQueueWorker;
use loom_exchanges::mock::{MockExchangeAdapter, MockExchangeConfig};
use rust_decimal_macros::dec;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
async fn cancel_retries_on_schedule_then_succeeds(pool: PgPool) {
    let fixture = common::seed_binding(&pool, "mock").await;
    let repository = Arc::new(OrderRepository::new(pool.clone()));
    let adapter = MockExchangeAdapter::new(MockExchangeConfig {
        fill_immediately: false,
        ..MockExchangeConfig::new("mock")
    });

    let created = adapter
        .create_order(CreateOrderRequest {
            symbol: "BTC/USDT".to_string(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            quantity: dec!(1),
            price: Some(dec!(50000)),
            stop_price: None,
            market_type: MarketType::Spot,
            params: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let mut tx = repository.begin().await.unwrap();
    let order = repository
        .create_open_order(
            &mut tx,
            fixture.strategy_account_id,
            fixture.account_id,
            &created.exchange_order_id,
            "BTC/USDT",
            Side::Sell,
            OrderType::Limit,
            Some(dec!(50000)),
            None,
            dec!(1),
            MarketType::Spot,
            common::ts(30),
            0,
            dec!(50000),
        )
        .await
        .unwrap();
    repository.mark_cancelling(&mut tx, order.id).await.unwrap();
    let entry = CancelQueueRepository::insert(&mut tx, order.id, fixture.strategy_id, fixture.account_id)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    adapter.set_cancel_failures(&order.exchange_order_id, 2);

    let mut registry: ExchangeRegistry = HashMap::new();
    let dyn_adapter: Arc<dyn ExchangeAdapter> = adapter.clone();
    registry.insert(fixture.account_id, dyn_adapter);
    let worker = CancelQueueWorker::new(repository.clone(), Arc::new(registry));

    // Attempt 1: fails (503), schedules retry 1 ~60s out.
    assert_eq!(worker.drain_once().await.unwrap(), 1);
    let (retry_count, next_retry_at, status): (i32, Option<chrono::DateTime<Utc>>, String) = sqlx::query_as(
        "SELECT retry_count, next_retry_at, status FROM cancel_queue WHERE id = $1",
    )
    .bind(entry.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(retry_count, 1);
    assert_eq!(status, "PENDING");
    let delay = next_retry_at.unwrap() - Utc::now();
    assert!(delay.num_seconds() > 50 && delay.num_seconds() <= 60, "expected ~60s backoff, got {delay}");

    // Nothing claimed again immediately — not due yet.
    assert_eq!(
        {
            let mut tx = repository.begin().await.unwrap();
            let due = CancelQueueRepository::claim_due(&mut tx, 10).await.unwrap();
            tx.rollback().await.unwrap();
            due.len()
        },
        0
    );

    // Fast-forward: pretend the 60s elapsed.
    sqlx::query("UPDATE cancel_queue SET next_retry_at = now() - interval '1 second' WHERE id = $1")
        .bind(entry.id)
        .execute(&pool)
        .await
        .unwrap();

    // Attempt 2: fails again (503), schedules retry 2 ~120s out.
    assert_eq!(worker.drain_once().await.unwrap(), 1);
    let (retry_count, next_retry_at, status): (i32, Option<chrono::DateTime<Utc>>, String) = sqlx::query_as(
        "SELECT retry_count, next_retry_at, status FROM cancel_queue WHERE id = $1",
    )
    .bind(entry.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(retry_count, 2);
    assert_eq!(status, "PENDING");
    let delay = next_retry_at.unwrap() - Utc::now();
    assert!(delay.num_seconds() > 110 && delay.num_seconds() <= 120, "expected ~120s backoff, got {delay}");

    sqlx::query("UPDATE cancel_queue SET next_retry_at = now() - interval '1 second' WHERE id = $1")
        .bind(entry.id)
        .execute(&pool)
        .await
        .unwrap();

    // Attempt 3: the mock's failure budget is spent, so this cancel
    // succeeds — order transitions to CANCELLED (row deleted) and the
    // queue entry is marked SUCCESS.
    assert_eq!(worker.drain_once().await.unwrap(), 1);
    let status: (String,) = sqlx::query_as("SELECT status FROM cancel_queue WHERE id = $1")
        .bind(entry.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status.0, "SUCCESS");

    let mut tx = repository.begin().await.unwrap();
    let gone = repository.find_by_id(&mut tx, order.id).await.unwrap();
    tx.rollback().await.unwrap();
    assert!(gone.is_none(), "terminal transition should have deleted the open_orders row");
}
