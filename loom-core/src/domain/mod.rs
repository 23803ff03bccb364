//! Entities from spec.md §3, grouped by the component that owns their
//! mutations (spec.md §3 "Ownership summary").

pub mod account;
pub mod cancel_queue;
pub mod failed_order;
pub mod mapping;
pub mod order;
pub mod trade;

pub use account::{Account, Strategy, StrategyAccount, StrategyCapital};
pub use cancel_queue::{CancelQueueEntry, CancelStatus};
pub use failed_order::{FailedOrder, FailedOrderStatus, OperationType, OrderParams};
pub use mapping::{OrderMappingCache, OrderMappingEntry};
pub use order::{MarketType, OpenOrder, OrderStatus, OrderType, PendingOrder, Side};
pub use trade::{StrategyPosition, Trade};
