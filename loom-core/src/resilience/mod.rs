//! Resilience patterns shared across components: exponential backoff
//! (used by C6 WS reconnect and C7 retry scheduling) and task supervision
//! (SPEC_FULL.md §5.1).

pub mod backoff;
pub mod panic_guard;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use panic_guard::supervise;
