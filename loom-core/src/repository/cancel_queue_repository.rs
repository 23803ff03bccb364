//! Persistence for `cancel_queue`, written by C5's rebalance (DB-first
//! cancel intents) and drained by C7's `CancelQueueWorker` (spec.md §4.5,
//! §4.7).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{CancelQueueEntry, CancelStatus};
use crate::error::RepositoryError;
use crate::repository::Tx;
use crate::retry::sanitize::sanitize_exchange_error;

pub struct CancelQueueRepository;

impl CancelQueueRepository {
    pub async fn insert(
        tx: &mut Tx<'_>,
        order_id: Uuid,
        strategy_id: Uuid,
        account_id: Uuid,
    ) -> Result<CancelQueueEntry, RepositoryError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO cancel_queue (
                id, order_id, strategy_id, account_id, requested_at, retry_count,
                max_retries, next_retry_at, status, error_message
            ) VALUES ($1, $2, $3, $4, $5, 0, $6, NULL, 'PENDING', NULL)
            "#,
        )
        .bind(id)
        .bind(order_id)
        .bind(strategy_id)
        .bind(account_id)
        .bind(now)
        .bind(CancelQueueEntry::DEFAULT_MAX_RETRIES as i32)
        .execute(&mut **tx)
        .await?;

        Ok(CancelQueueEntry {
            id,
            order_id,
            strategy_id,
            account_id,
            requested_at: now,
            retry_count: 0,
            max_retries: CancelQueueEntry::DEFAULT_MAX_RETRIES,
            next_retry_at: None,
            status: CancelStatus::Pending,
            error_message: None,
        })
    }

    /// `FOR UPDATE SKIP LOCKED` claim of the next batch of due retries
    /// (spec.md §4.7 step 1): claims are committed by the caller
    /// immediately so concurrent workers never double-process a row.
    pub async fn claim_due(
        tx: &mut Tx<'_>,
        limit: i64,
    ) -> Result<Vec<CancelQueueEntry>, RepositoryError> {
        let rows: Vec<CancelQueueRow> = sqlx::query_as(
            r#"
            SELECT id, order_id, strategy_id, account_id, requested_at, retry_count,
                   max_retries, next_retry_at, status, error_message
            FROM cancel_queue
            WHERE status IN ('PENDING', 'PROCESSING')
              AND (next_retry_at IS NULL OR next_retry_at <= now())
            ORDER BY requested_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            sqlx::query("UPDATE cancel_queue SET status = 'PROCESSING' WHERE id = $1")
                .bind(row.id)
                .execute(&mut **tx)
                .await?;
            let mut entry: CancelQueueEntry = row.into();
            entry.status = CancelStatus::Processing;
            claimed.push(entry);
        }
        Ok(claimed)
    }

    pub async fn mark_succeeded(tx: &mut Tx<'_>, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE cancel_queue SET status = 'SUCCESS' WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn mark_failed_retry(
        tx: &mut Tx<'_>,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        error_message: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE cancel_queue
            SET status = 'PENDING', retry_count = $2, next_retry_at = $3, error_message = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(sanitize_exchange_error(error_message))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn mark_exhausted(
        tx: &mut Tx<'_>,
        id: Uuid,
        error_message: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"UPDATE cancel_queue SET status = 'FAILED', error_message = $2 WHERE id = $1"#,
        )
        .bind(id)
        .bind(sanitize_exchange_error(error_message))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CancelQueueRow {
    id: Uuid,
    order_id: Uuid,
    strategy_id: Uuid,
    account_id: Uuid,
    requested_at: DateTime<Utc>,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<DateTime<Utc>>,
    status: String,
    error_message: Option<String>,
}

impl From<CancelQueueRow> for CancelQueueEntry {
    fn from(row: CancelQueueRow) -> Self {
        CancelQueueEntry {
            id: row.id,
            order_id: row.order_id,
            strategy_id: row.strategy_id,
            account_id: row.account_id,
            requested_at: row.requested_at,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            next_retry_at: row.next_retry_at,
            status: parse_cancel_status(&row.status),
            error_message: row.error_message,
        }
    }
}

fn parse_cancel_status(raw: &str) -> CancelStatus {
    match raw {
        "PROCESSING" => CancelStatus::Processing,
        "SUCCESS" => CancelStatus::Success,
        "FAILED" => CancelStatus::Failed,
        _ => CancelStatus::Pending,
    }
}
