//! Dumps a single (account, symbol) bucket's open and pending orders in
//! the same order `OrderQueueManager::rebalance` would sort them in —
//! useful for checking priority/sort-price/webhook-time tie-breaking by
//! eye without attaching a debugger (spec.md §4.5 ordering invariant).

use anyhow::Result;
use clap::Parser;
use loom_core::config::Settings;
use loom_core::domain::{OpenOrder, PendingOrder};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[derive(Parser)]
#[command(about = "Print a bucket's open + pending orders in rebalance order")]
struct Args {
    #[arg(long)]
    account_id: Uuid,
    #[arg(long)]
    symbol: String,
}

enum Row {
    Open(OpenOrder),
    Pending(PendingOrder),
}

impl Row {
    fn sort_key(&self) -> (i32, rust_decimal::Decimal, chrono::DateTime<chrono::Utc>, Uuid) {
        match self {
            Row::Open(o) => (o.priority, o.sort_price, o.webhook_received_at, o.id),
            Row::Pending(p) => (p.priority, p.sort_price, p.webhook_received_at, p.id),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&settings.database_url)
        .await?;

    let repository = loom_core::repository::OrderRepository::new(pool);
    let mut tx = repository.begin().await?;

    let open = repository
        .open_orders_for_bucket(&mut tx, args.account_id, &args.symbol)
        .await?;
    let pending = repository
        .pending_orders_for_bucket(&mut tx, args.account_id, &args.symbol)
        .await?;
    tx.rollback().await?;

    let mut rows: Vec<Row> = open.into_iter().map(Row::Open).chain(pending.into_iter().map(Row::Pending)).collect();
    rows.sort_by_key(Row::sort_key);

    println!("bucket ({}, {}): {} row(s)", args.account_id, args.symbol, rows.len());
    for row in &rows {
        match row {
            Row::Open(o) => println!(
                "  OPEN    id={} side={:?} status={:?} priority={} price={:?} qty={} filled={}",
                o.id, o.side, o.status, o.priority, o.price, o.quantity, o.filled_quantity
            ),
            Row::Pending(p) => println!(
                "  PENDING id={} side={:?} priority={} sort_price={} qty={} retry={}",
                p.id, p.side, p.priority, p.sort_price, p.quantity, p.retry_count
            ),
        }
    }

    Ok(())
}
