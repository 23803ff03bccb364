//! `loom-paper` — runs the same `TradingSystem` as `loom-server` but backs
//! every configured account with `loom_exchanges::MockExchangeAdapter`
//! instead of a live REST/WS connection (SPEC_FULL.md §4.1). Useful for
//! rehearsing strategy webhooks and queue behavior against Postgres without
//! risking a real exchange account.

use std::collections::HashMap;

use anyhow::{Context, Result};
use loom_bins::common::init_logging;
use loom_core::exchange::ExchangeRegistry;
use loom_core::prelude::*;
use loom_exchanges::mock::MockExchangeConfig;
use loom_exchanges::MockExchangeAdapter;
use uuid::Uuid;

fn mock_registry_from_env() -> Result<ExchangeRegistry> {
    let mut registry: ExchangeRegistry = HashMap::new();
    let mut index = 1u32;

    loop {
        let Ok(account_id) = std::env::var(format!("ACCOUNT_{index}_ID")) else {
            break;
        };
        let account_id = Uuid::parse_str(&account_id)
            .with_context(|| format!("ACCOUNT_{index}_ID is not a valid UUID"))?;
        let exchange_name = std::env::var(format!("ACCOUNT_{index}_EXCHANGE"))
            .unwrap_or_else(|_| "paper".to_string());

        let adapter = MockExchangeAdapter::new(MockExchangeConfig::new(exchange_name));
        registry.insert(account_id, adapter);
        index += 1;
    }

    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info")?;

    let settings = Settings::from_env()?;
    let exchanges = mock_registry_from_env()?;

    tracing::info!(accounts = exchanges.len(), "starting loom-paper");

    let system = TradingSystem::new(settings, exchanges).await?;
    let tasks = system.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("received SIGINT, shutting down");
    system.shutdown(tasks).await;
    Ok(())
}
