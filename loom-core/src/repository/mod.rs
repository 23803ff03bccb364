//! C4: Postgres-backed persistence for orders, pending orders, the
//! processing lock they're mutated behind, and the cancel/failed-order
//! retry tables C5 and C7 share.

pub mod cancel_queue_repository;
pub mod failed_order_repository;
pub mod order_repository;
pub mod strategy_repository;
pub mod trade_repository;

pub use cancel_queue_repository::CancelQueueRepository;
pub use failed_order_repository::FailedOrderRepository;
pub use order_repository::{OrderRepository, Tx};
pub use strategy_repository::StrategyRepository;
pub use trade_repository::TradeRepository;
