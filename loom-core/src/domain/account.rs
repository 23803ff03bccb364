//! Account, Strategy, StrategyAccount and StrategyCapital — the
//! configuration-side entities that the webhook dispatcher fans signals
//! across. Capital allocation math itself lives outside the core
//! (spec.md §1); `StrategyCapital` is read-only from this crate's point of
//! view.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::MarketType;

/// An exchange account. Credentials are never held here — they live
/// behind whatever capability constructed the matching
/// `Arc<dyn ExchangeAdapter>`; this struct carries only what the core
/// needs to route and log against (spec.md §3 invariant: credentials
/// never logged or serialized outside C1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub exchange_name: String,
    pub market_type: MarketType,
}

/// A strategy: the thing a TradingView webhook is bound to via
/// `group_name` + `webhook_token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub group_name: String,
    /// Opaque — compared with a constant-time comparison, never logged.
    pub webhook_token: String,
    pub is_active: bool,
    pub is_public: bool,
}

/// A (strategy, account) binding with its own weight/leverage/limits.
///
/// `subscriber_token` is `Some` only on bindings a subscriber attached to a
/// *public* strategy under their own token (spec.md §4.8); it authenticates
/// a webhook that should route to this one binding rather than fanning out
/// to every active binding the way `Strategy::webhook_token` does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAccount {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub account_id: Uuid,
    pub weight: Decimal,
    pub leverage: Decimal,
    pub max_symbols: i32,
    pub is_active: bool,
    pub subscriber_token: Option<String>,
}

/// Per-`StrategyAccount` capital allocation. Mutated only by the capital
/// allocator, which is external to this crate; the queue manager reads it
/// for order sizing but never writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyCapital {
    pub strategy_account_id: Uuid,
    pub allocated_capital: Decimal,
    pub last_rebalance_at: Option<DateTime<Utc>>,
}
