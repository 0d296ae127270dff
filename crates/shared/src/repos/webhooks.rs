use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::{Store, StoreError, StoreFuture, WebhookStore};
use crate::models::{WebhookRecord, WebhookStatus};

impl WebhookStore for Store {
    fn enqueue_webhook<'a>(
        &'a self,
        payload: &'a [u8],
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Uuid> {
        Box::pin(async move {
            if max_retries <= 0 {
                return Err(StoreError::InvalidData(
                    "max_retries must be > 0".to_string(),
                ));
            }

            let id: Uuid = sqlx::query_scalar(
                "INSERT INTO webhook_records (
                   id, payload, status, retry_count, max_retries, created_at, updated_at
                 )
                 VALUES ($1, $2, 'PENDING', 0, $3, $4, $4)
                 RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(payload)
            .bind(max_retries)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

            Ok(id)
        })
    }

    fn get_webhook<'a>(&'a self, id: Uuid) -> StoreFuture<'a, Option<WebhookRecord>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, payload, status, retry_count, max_retries, created_at,
                        last_attempt_at, next_retry_at, processed_at, last_error, error_detail
                 FROM webhook_records
                 WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            row.map(webhook_record_from_row).transpose()
        })
    }

    fn list_pending<'a>(&'a self, limit: i64) -> StoreFuture<'a, Vec<WebhookRecord>> {
        Box::pin(async move {
            if limit <= 0 {
                return Ok(Vec::new());
            }

            let rows = sqlx::query(
                "SELECT id, payload, status, retry_count, max_retries, created_at,
                        last_attempt_at, next_retry_at, processed_at, last_error, error_detail
                 FROM webhook_records
                 WHERE status = 'PENDING'
                 ORDER BY created_at ASC, id ASC
                 LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(webhook_record_from_row).collect()
        })
    }

    fn list_failed_due<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'a, Vec<WebhookRecord>> {
        Box::pin(async move {
            if limit <= 0 {
                return Ok(Vec::new());
            }

            let rows = sqlx::query(
                "SELECT id, payload, status, retry_count, max_retries, created_at,
                        last_attempt_at, next_retry_at, processed_at, last_error, error_detail
                 FROM webhook_records
                 WHERE status = 'FAILED'
                   AND next_retry_at <= $1
                 ORDER BY next_retry_at ASC, created_at ASC, id ASC
                 LIMIT $2",
            )
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(webhook_record_from_row).collect()
        })
    }

    fn list_stale_processing<'a>(
        &'a self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'a, Vec<WebhookRecord>> {
        Box::pin(async move {
            if limit <= 0 {
                return Ok(Vec::new());
            }

            let rows = sqlx::query(
                "SELECT id, payload, status, retry_count, max_retries, created_at,
                        last_attempt_at, next_retry_at, processed_at, last_error, error_detail
                 FROM webhook_records
                 WHERE status = 'PROCESSING'
                   AND last_attempt_at <= $1
                 ORDER BY last_attempt_at ASC, id ASC
                 LIMIT $2",
            )
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(webhook_record_from_row).collect()
        })
    }

    fn list_dead_letters<'a>(&'a self, limit: i64) -> StoreFuture<'a, Vec<WebhookRecord>> {
        Box::pin(async move {
            if limit <= 0 {
                return Ok(Vec::new());
            }

            let rows = sqlx::query(
                "SELECT id, payload, status, retry_count, max_retries, created_at,
                        last_attempt_at, next_retry_at, processed_at, last_error, error_detail
                 FROM webhook_records
                 WHERE status = 'DEAD_LETTER'
                 ORDER BY last_attempt_at DESC NULLS LAST, id ASC
                 LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(webhook_record_from_row).collect()
        })
    }

    fn claim<'a>(
        &'a self,
        id: Uuid,
        expected: WebhookStatus,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE webhook_records
                 SET status = 'PROCESSING',
                     last_attempt_at = $3,
                     updated_at = NOW()
                 WHERE id = $1
                   AND status = $2
                   AND (
                     status = 'PENDING'
                     OR (status = 'FAILED' AND next_retry_at <= $3)
                   )",
            )
            .bind(id)
            .bind(expected.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn update_status<'a>(&'a self, record: &'a WebhookRecord) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE webhook_records
                 SET status = $2,
                     retry_count = $3,
                     next_retry_at = $5,
                     processed_at = $6,
                     last_error = $7,
                     error_detail = $8,
                     updated_at = NOW()
                 WHERE id = $1
                   AND status = 'PROCESSING'
                   AND last_attempt_at IS NOT DISTINCT FROM $4",
            )
            .bind(record.id)
            .bind(record.status.as_str())
            .bind(record.retry_count)
            .bind(record.last_attempt_at)
            .bind(record.next_retry_at)
            .bind(record.processed_at)
            .bind(record.last_error.as_deref())
            .bind(record.error_detail.as_deref())
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn count_due<'a>(&'a self, now: DateTime<Utc>) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*)::bigint
                 FROM webhook_records
                 WHERE status = 'PENDING'
                    OR (status = 'FAILED' AND next_retry_at <= $1)",
            )
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

            Ok(count)
        })
    }
}

fn webhook_record_from_row(row: PgRow) -> Result<WebhookRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status = WebhookStatus::from_db(&status).ok_or_else(|| {
        StoreError::InvalidData(format!("unknown webhook status persisted: {status}"))
    })?;

    Ok(WebhookRecord {
        id: row.try_get("id")?,
        payload: row.try_get("payload")?,
        status,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        created_at: row.try_get("created_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        next_retry_at: row.try_get("next_retry_at")?,
        processed_at: row.try_get("processed_at")?,
        last_error: row.try_get("last_error")?,
        error_detail: row.try_get("error_detail")?,
    })
}
