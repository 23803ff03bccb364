//! Shared setup for every `loom-bins` binary: logging init and the
//! `ExchangeRegistry` construction each of them needs before it can hand a
//! `TradingSystem` anything to talk to an exchange with.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use loom_core::exchange::{ExchangeAdapter, ExchangeRegistry};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Initializes `tracing` the way every binary in this workspace does:
/// `RUST_LOG` if set, otherwise the given default filter string.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}

/// Builds an `ExchangeRegistry` from `ACCOUNT_<n>_ID`/`ACCOUNT_<n>_EXCHANGE`
/// environment variables, constructing one `loom_exchanges::RestExchange`
/// per account. Credential lookup (decrypting `api_key_ref`/`api_secret_ref`,
/// SPEC_FULL.md §3.2) is left to whatever secrets layer the deployment uses;
/// this reads already-decrypted `ACCOUNT_<n>_API_KEY`/`_API_SECRET` values
/// directly, matching this crate's "adapters are handed a capability, not
/// built by the core" boundary (spec.md §1).
pub fn exchange_registry_from_env() -> Result<ExchangeRegistry> {
    let mut registry: ExchangeRegistry = HashMap::new();
    let mut index = 1u32;

    loop {
        let Ok(account_id) = std::env::var(format!("ACCOUNT_{index}_ID")) else {
            break;
        };
        let account_id = Uuid::parse_str(&account_id)
            .with_context(|| format!("ACCOUNT_{index}_ID is not a valid UUID"))?;
        let exchange = std::env::var(format!("ACCOUNT_{index}_EXCHANGE"))
            .with_context(|| format!("missing ACCOUNT_{index}_EXCHANGE"))?;
        let rest_base_url = std::env::var(format!("ACCOUNT_{index}_REST_URL"))
            .with_context(|| format!("missing ACCOUNT_{index}_REST_URL"))?;
        let ws_private_url = std::env::var(format!("ACCOUNT_{index}_WS_URL"))
            .with_context(|| format!("missing ACCOUNT_{index}_WS_URL"))?;
        let api_key = std::env::var(format!("ACCOUNT_{index}_API_KEY")).unwrap_or_default();
        let api_secret = std::env::var(format!("ACCOUNT_{index}_API_SECRET")).unwrap_or_default();

        let exchange_client = loom_exchanges::RestExchange::new(loom_exchanges::RestExchangeConfig {
            exchange_name: exchange.clone(),
            rest_base_url,
            ws_private_url,
            api_key,
            api_secret,
            recv_window_ms: 5_000,
            request_timeout: Duration::from_secs(10),
        })
        .with_context(|| format!("failed to construct adapter for account {account_id} ({exchange})"))?;
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(exchange_client);
        registry.insert(account_id, adapter);
        index += 1;
    }

    Ok(registry)
}
