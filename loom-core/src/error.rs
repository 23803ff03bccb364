//! Typed error taxonomy (spec.md §7, §9 redesign notes).
//!
//! The teacher crate hand-rolls `Display`/`Error` impls for its low-level
//! arithmetic errors (`OverflowError`, `ConversionError`) and never touches
//! the `thiserror` dependency it declares. This crate is the first real
//! consumer of it: every service-boundary error below is a tagged enum a
//! caller can match on (per spec.md §9's "retry classifier is a pure
//! function over the tag"), and `Error` is the top-level sum type that
//! `?` converts into at crate boundaries.

use thiserror::Error;

/// A single exchange-facing error taxonomy, shared by every
/// `ExchangeAdapter` implementation (spec.md §4.1).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExchangeAdapterError {
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Non-retriable 4xx (except 429).
    #[error("exchange API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("exchange server error: {0}")]
    Server(String),

    /// Semantically "already gone" — treated as success by cancel paths.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
}

impl ExchangeAdapterError {
    /// Pure classifier used by C7's retry logic (spec.md §4.7, §9).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ExchangeAdapterError::RateLimit { .. }
                | ExchangeAdapterError::Network(_)
                | ExchangeAdapterError::Server(_)
        )
    }

    /// Idempotent-recovery case: a cancel that finds nothing to cancel is
    /// a success (spec.md §4.5 edge policy, §4.7 idempotency rule).
    pub fn is_already_gone(&self) -> bool {
        matches!(self, ExchangeAdapterError::OrderNotFound(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown symbol {symbol} on {exchange} ({market_type:?}); refusing to trade fail-closed")]
    UnknownSymbol {
        exchange: String,
        symbol: String,
        market_type: crate::domain::MarketType,
    },

    #[error("quantity {quantity} below minimum {min_qty}")]
    BelowMinQuantity {
        quantity: rust_decimal::Decimal,
        min_qty: rust_decimal::Decimal,
    },

    #[error("quantity {quantity} above maximum {max_qty}")]
    AboveMaxQuantity {
        quantity: rust_decimal::Decimal,
        max_qty: rust_decimal::Decimal,
    },

    #[error("notional {notional} below minimum {min_notional}")]
    BelowMinNotional {
        notional: rust_decimal::Decimal,
        min_notional: rust_decimal::Decimal,
    },

    #[error("limit order requires a price")]
    MissingPrice,

    #[error("stop order requires a stop price")]
    MissingStopPrice,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PriceCacheError {
    /// Must never be swallowed into a stale/synthesized rate — downstream
    /// capital math is money-sensitive (spec.md §4.3, §7, §8).
    #[error("USDT/KRW exchange rate unavailable")]
    ExchangeRateUnavailable,

    #[error("no cached price for {exchange}/{symbol:?}")]
    NoCachedPrice { exchange: String, symbol: String },
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order {id} is in terminal status {status:?}; refusing transition to {attempted:?}")]
    TerminalTransition {
        id: uuid::Uuid,
        status: crate::domain::OrderStatus,
        attempted: crate::domain::OrderStatus,
    },

    #[error("processing lock for order {id} was not held by this caller")]
    ProcessingLockNotHeld { id: uuid::Uuid },

    #[error("order {id} not found")]
    NotFound { id: uuid::Uuid },
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid token")]
    InvalidToken,

    #[error("unknown strategy group {0}")]
    UnknownStrategy(String),

    #[error("strategy {0} is not active")]
    InactiveStrategy(String),

    #[error("failed to acquire per-(strategy,symbol) lock within {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("too many concurrent locks (cap {0} reached)")]
    LockRegistryFull(usize),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("price unavailable: {0}")]
    Price(#[from] PriceCacheError),

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{name} must be in range {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: String,
        min: String,
        max: String,
    },
}

/// Top-level crate error. `anyhow::Result` is still used at binary edges
/// (same split the teacher already makes between precise domain errors and
/// `anyhow` in `main`s), but library code returns this where callers might
/// reasonably match on the cause.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Exchange(#[from] ExchangeAdapterError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    PriceCache(#[from] PriceCacheError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(ExchangeAdapterError::Network("timeout".into()).is_retriable());
        assert!(ExchangeAdapterError::Server("5xx".into()).is_retriable());
        assert!(ExchangeAdapterError::RateLimit { retry_after_secs: 1 }.is_retriable());
        assert!(!ExchangeAdapterError::Auth("bad key".into()).is_retriable());
        assert!(!ExchangeAdapterError::Api { status: 400, message: "bad request".into() }.is_retriable());
    }

    #[test]
    fn order_not_found_is_already_gone() {
        assert!(ExchangeAdapterError::OrderNotFound("x".into()).is_already_gone());
        assert!(!ExchangeAdapterError::Network("x".into()).is_already_gone());
    }
}
