//! Runtime configuration (spec.md §6, SPEC_FULL.md §6.1).
//!
//! The teacher crate configures its hot path at compile time via Cargo
//! features (see the removed `bog-core` feature matrix) because its risk
//! limits never change without a redeploy. This system's config changes
//! per exchange and per account without a rebuild, so every value here is
//! read once from the environment at startup into a plain struct — no
//! Cargo features, no ambient globals (spec.md §9 redesign notes).

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_in_range<T>(name: &'static str, raw: &str, min: T, max: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value: T = raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: "not parseable".to_string(),
    })?;
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            name,
            value: raw.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(value)
}

fn env_in_range<T>(name: &'static str, default: T, min: T, max: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    match env::var(name) {
        Ok(raw) => parse_in_range(name, &raw, min, max),
        Err(_) => Ok(default),
    }
}

/// Top-level runtime settings, loaded once at process start and then held
/// immutably by [`crate::system::TradingSystem`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,

    pub db_pool_size: u32,
    pub db_max_overflow: u32,

    pub market_order_timeout: Duration,

    pub cancel_queue_interval: Duration,
    pub max_cancel_retries: u32,

    pub exchange_timeout: Duration,
    pub exchange_max_retries: u32,

    pub webhook_lock_timeout: Duration,
    pub max_webhook_locks: usize,

    pub webhook_listen_addr: String,
    pub metrics_listen_addr: String,

    /// Per-exchange override of request rate, e.g. `BYBIT_RATE_LIMIT=15.0`.
    pub exchange_rate_limits: Vec<(String, f64)>,
}

impl Settings {
    pub fn from_env() -> Result<Settings, ConfigError> {
        let database_url = env_var("DATABASE_URL")?;

        let db_pool_size = env_in_range("DB_POOL_SIZE", 20, 1, 100)?;
        let db_max_overflow = env_in_range("DB_MAX_OVERFLOW", 10, 0, 50)?;

        let market_order_timeout =
            Duration::from_secs(env_in_range("MARKET_ORDER_TIMEOUT", 10, 1, 60)?);

        let cancel_queue_interval =
            Duration::from_secs(env_in_range("CANCEL_QUEUE_INTERVAL", 10, 5, 60)?);
        let max_cancel_retries = env_in_range("MAX_CANCEL_RETRIES", 5, 1, 10)?;

        let exchange_timeout = Duration::from_secs(env_in_range("EXCHANGE_TIMEOUT", 30, 5, 120)?);
        let exchange_max_retries = env_in_range("EXCHANGE_MAX_RETRIES", 3, 1, 10)?;

        let webhook_lock_timeout =
            Duration::from_secs(env_in_range("WEBHOOK_LOCK_TIMEOUT", 30, 1, 300)?);
        let max_webhook_locks = env_in_range("MAX_WEBHOOK_LOCKS", 1000usize, 1, 1_000_000)?;

        let webhook_listen_addr =
            env::var("WEBHOOK_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let metrics_listen_addr =
            env::var("METRICS_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:9090".to_string());

        let exchange_rate_limits = parse_rate_limit_vars();

        Ok(Settings {
            database_url,
            db_pool_size,
            db_max_overflow,
            market_order_timeout,
            cancel_queue_interval,
            max_cancel_retries,
            exchange_timeout,
            exchange_max_retries,
            webhook_lock_timeout,
            max_webhook_locks,
            webhook_listen_addr,
            metrics_listen_addr,
            exchange_rate_limits,
        })
    }

    /// Per-exchange rate limit, falling back to 10 req/s (spec.md §5,
    /// §6: `<EXCHANGE>_RATE_LIMIT` req/s, 1.0-100.0, default 10).
    pub fn rate_limit_for(&self, exchange: &str) -> f64 {
        self.exchange_rate_limits
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(exchange))
            .map(|(_, rate)| *rate)
            .unwrap_or(10.0)
    }
}

/// Scans the environment for `<EXCHANGE>_RATE_LIMIT` variables. There is no
/// fixed list of exchanges to enumerate up front, so this walks
/// `std::env::vars()` once at startup rather than probing named keys.
fn parse_rate_limit_vars() -> Vec<(String, f64)> {
    env::vars()
        .filter_map(|(key, value)| {
            let exchange = key.strip_suffix("_RATE_LIMIT")?;
            let rate: f64 = value.parse().ok()?;
            if !(1.0..=100.0).contains(&rate) {
                return None;
            }
            Some((exchange.to_lowercase(), rate))
        })
        .collect()
}
