//! spec.md §8 scenario 4 "Crash mid-processing": a reconciliation claims
//! `is_processing` and then the process dies before releasing it. The
//! stale-reap sweep must clear the flag after its threshold so a later
//! reconciliation can claim the row again, and the `trades` table's
//! UNIQUE(exchange_order_id) constraint must keep that re-processing from
//! producing a second row for the same fill.

mod common;

use std::sync::Arc;

use loom_core::domain::{MarketType, OrderType, Side};
use loom_core::repository::{OrderRepository, TradeRepository};
use rust_decimal_macros::dec;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
async fn reaper_frees_stale_lock_and_reprocessing_avoids_duplicate_trade(pool: PgPool) {
    let fixture = common::seed_binding(&pool, "mock").await;
    let repository = Arc::new(OrderRepository::new(pool.clone()));

    let mut tx = repository.begin().await.unwrap();
    let order = repository
        .create_open_order(
            &mut tx,
            fixture.strategy_account_id,
            fixture.account_id,
            "mock-crash-1",
            "BTC/USDT",
            Side::Buy,
            OrderType::Market,
            Some(dec!(50000)),
            None,
            dec!(1),
            MarketType::Spot,
            common::ts(60),
            0,
            dec!(50000),
        )
        .await
        .unwrap();

    // A reconciliation claims the lock, writes the trade, then "crashes"
    // before transitioning the order or releasing the lock.
    assert!(repository.try_acquire_processing_lock(&mut tx, order.id).await.unwrap());
    let first_insert = TradeRepository::insert_if_absent(
        &mut tx,
        order.strategy_account_id,
        &order.exchange_order_id,
        &order.symbol,
        order.side,
        order.quantity,
        order.price,
        dec!(50000),
        dec!(0.05),
        dec!(0),
        true,
        order.market_type,
    )
    .await
    .unwrap();
    assert!(first_insert.is_some());
    tx.commit().await.unwrap();

    // A second reconciliation attempt while the lock is still held must
    // see it as already claimed.
    let mut tx = repository.begin().await.unwrap();
    assert!(!repository.try_acquire_processing_lock(&mut tx, order.id).await.unwrap());
    tx.rollback().await.unwrap();

    // Back-date `processing_started_at` past the reap threshold, standing
    // in for the crash-to-reap time gap the real scenario waits out.
    sqlx::query("UPDATE open_orders SET processing_started_at = now() - interval '10 minutes' WHERE id = $1")
        .bind(order.id)
        .execute(&pool)
        .await
        .unwrap();

    let reaped = repository.reap_stale_processing(chrono::Duration::minutes(5)).await.unwrap();
    assert_eq!(reaped, 1);

    // Reconciliation can now reclaim the row and re-run its fill-insert
    // step; the UNIQUE constraint on `exchange_order_id` makes that a
    // no-op rather than a duplicate trade.
    let mut tx = repository.begin().await.unwrap();
    assert!(repository.try_acquire_processing_lock(&mut tx, order.id).await.unwrap());
    let second_insert = TradeRepository::insert_if_absent(
        &mut tx,
        order.strategy_account_id,
        &order.exchange_order_id,
        &order.symbol,
        order.side,
        order.quantity,
        order.price,
        dec!(50000),
        dec!(0.05),
        dec!(0),
        true,
        order.market_type,
    )
    .await
    .unwrap();
    assert!(second_insert.is_none(), "re-processing the same fill must not insert a second trade row");

    repository
        .transition(&mut tx, order.id, loom_core::domain::OrderStatus::Filled, Some(order.quantity))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let trade_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades WHERE exchange_order_id = $1")
        .bind(&order.exchange_order_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(trade_count.0, 1);

    let mut tx = repository.begin().await.unwrap();
    let gone = repository.find_by_id(&mut tx, order.id).await.unwrap();
    tx.rollback().await.unwrap();
    assert!(gone.is_none());
}
