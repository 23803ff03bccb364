//! CancelQueue — durable record of a cancel intent that could not complete
//! synchronously. Lifecycle owned exclusively by
//! [`crate::retry::CancelQueueWorker`] (C7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl CancelStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CancelStatus::Success | CancelStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelQueueEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub strategy_id: Uuid,
    pub account_id: Uuid,
    pub requested_at: DateTime<Utc>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: CancelStatus,
    pub error_message: Option<String>,
}

impl CancelQueueEntry {
    pub const DEFAULT_MAX_RETRIES: i32 = 5;
}
