//! C9: position reconciliation against confirmed fills.

pub mod reconciler;

pub use reconciler::{FillOutcome, PositionReconciler};
