//! `loom-admin` — CLI surface over the same repository/queue APIs
//! `loom-server` uses, covering the manual-operations commands
//! `original_source/app/cli/securities.py` offered (SPEC_FULL.md §2.1):
//! reload the symbol cache, manually reap stale processing locks, manually
//! drain the cancel queue or failed-order queue one batch at a time. This
//! binary never reimplements C4/C5/C7 logic — it only calls into it.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use loom_bins::common::{exchange_registry_from_env, init_logging};
use loom_core::config::Settings;
use loom_core::repository::OrderRepository;
use loom_core::retry::{CancelQueueWorker, FailedOrderManager};
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "loom-admin", about = "Manual operations for the order execution pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clear `is_processing` locks held longer than the reap threshold
    /// (spec.md §4.4 `reap_stale_processing`, §7 crash recovery).
    Reap {
        #[arg(long, default_value_t = 300)]
        threshold_secs: i64,
    },
    /// Claim and process one batch of due `cancel_queue` rows.
    DrainCancelQueue,
    /// Claim and process one batch of due `failed_orders` rows.
    DrainFailedOrders,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info")?;
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.db_pool_size)
        .connect(&settings.database_url)
        .await?;
    let repository = Arc::new(OrderRepository::new(pool));

    match cli.command {
        Command::Reap { threshold_secs } => {
            let threshold = chrono::Duration::seconds(threshold_secs);
            let reaped = repository.reap_stale_processing(threshold).await?;
            println!("reaped {reaped} stale processing lock(s)");
        }
        Command::DrainCancelQueue => {
            let exchanges = Arc::new(exchange_registry_from_env()?);
            let worker = CancelQueueWorker::new(repository, exchanges);
            let processed = worker.drain_once().await?;
            println!("processed {processed} cancel_queue entr(y/ies)");
        }
        Command::DrainFailedOrders => {
            let exchanges = Arc::new(exchange_registry_from_env()?);
            let manager = FailedOrderManager::new(repository, exchanges);
            let processed = manager.drain_once().await?;
            println!("processed {processed} failed_orders entr(y/ies)");
        }
    }

    Ok(())
}
