//! C7: the two background drains that keep `cancel_queue` and
//! `failed_orders` from accumulating forever (spec.md §4.7).
//!
//! Both workers share the same shape — claim a batch under `FOR UPDATE
//! SKIP LOCKED`, dispatch each claim to the exchange, classify the result,
//! write the outcome back in a short follow-up transaction — so the
//! exchange call itself never holds a row lock.

pub mod cancel_queue_worker;
pub mod failed_order_manager;
pub mod sanitize;

pub use cancel_queue_worker::CancelQueueWorker;
pub use failed_order_manager::FailedOrderManager;
