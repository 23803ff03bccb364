//! `loom-server` — the long-running process composing C1-C9 into one
//! `TradingSystem` (SPEC_FULL.md §2.1). Replaces the two FastAPI processes
//! `original_source/` split this into (`web_server` for webhook/account
//! routes, `web_fastapi_server` for cancel-queue/failed-order APIs) with a
//! single binary: both shared one Postgres database and background tasks
//! the ASGI app spawned at startup, which map directly onto the
//! `tokio::task::JoinSet` `TradingSystem::start` returns here.

use anyhow::Result;
use loom_bins::common::{exchange_registry_from_env, init_logging};
use loom_core::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info")?;

    let settings = Settings::from_env()?;
    let exchanges = exchange_registry_from_env()?;

    tracing::info!(accounts = exchanges.len(), "starting loom-server");

    let system = TradingSystem::new(settings, exchanges).await?;
    let tasks = system.start().await?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    system.shutdown(tasks).await;
    Ok(())
}
