//! C1: the `ExchangeAdapter` capability and its supporting rate limiter.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

pub mod adapter;
pub mod rate_limiter;

pub use adapter::{
    Balance, CreateOrderRequest, ExchangeAdapter, NormalizedOrder, PrivateOrderStream,
    RawOrderEvent,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};

/// Every component past C1 reaches an account's adapter through this map
/// rather than holding a concrete client, so C6/C7/C8 are generic over
/// "some exchange" the same way `ExchangeAdapter` itself is.
pub type ExchangeRegistry = HashMap<Uuid, Arc<dyn ExchangeAdapter>>;
