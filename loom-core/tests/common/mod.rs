//! Shared fixtures for the scenario tests in spec.md §8 / SPEC_FULL.md §8.
//! Not itself a test binary (lives under `tests/common/`, not directly
//! under `tests/`), so every `#[sqlx::test]` file can pull in the same
//! seeding helpers without duplicating the schema-shaped insert statements.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

pub struct Fixture {
    pub account_id: Uuid,
    pub strategy_id: Uuid,
    pub strategy_account_id: Uuid,
}

/// One account, one strategy, one active binding between them — the
/// minimum configuration-side state every order/cancel/trade row's
/// foreign keys need.
pub async fn seed_binding(pool: &PgPool, exchange_name: &str) -> Fixture {
    let account_id = Uuid::new_v4();
    let strategy_id = Uuid::new_v4();
    let strategy_account_id = Uuid::new_v4();

    sqlx::query("INSERT INTO accounts (id, exchange_name, market_type) VALUES ($1, $2, 'SPOT')")
        .bind(account_id)
        .bind(exchange_name)
        .execute(pool)
        .await
        .expect("seed account");

    sqlx::query(
        "INSERT INTO strategies (id, group_name, webhook_token, is_active, is_public) \
         VALUES ($1, $2, 'test-token', true, false)",
    )
    .bind(strategy_id)
    .bind(format!("strategy-{strategy_id}"))
    .execute(pool)
    .await
    .expect("seed strategy");

    sqlx::query(
        "INSERT INTO strategy_accounts (id, strategy_id, account_id, weight, leverage, max_symbols, is_active) \
         VALUES ($1, $2, $3, 1, 1, 10, true)",
    )
    .bind(strategy_account_id)
    .bind(strategy_id)
    .bind(account_id)
    .execute(pool)
    .await
    .expect("seed strategy_account");

    Fixture {
        account_id,
        strategy_id,
        strategy_account_id,
    }
}

pub fn ts(secs_ago: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::seconds(secs_ago)
}

pub fn qty(v: &str) -> Decimal {
    v.parse().unwrap()
}
