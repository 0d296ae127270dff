use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StoreError, StoreFuture, WebhookStore};
use crate::models::{WebhookRecord, WebhookStatus};

/// Process-local webhook store used by tests.
///
/// Listings use the same ordering as the Postgres store. `set_unavailable(true)` makes every
/// operation fail with [`StoreError::Unavailable`].
#[derive(Clone, Default)]
pub struct InMemoryWebhookStore {
    records: Arc<Mutex<Vec<WebhookRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is, bypassing ingestion defaults.
    pub async fn insert_record(&self, record: WebhookRecord) {
        let mut records = self.records.lock().await;
        records.retain(|existing| existing.id != record.id);
        records.push(record);
    }

    pub async fn snapshot(&self) -> Vec<WebhookRecord> {
        self.records.lock().await.clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn select<F, K, O>(&self, limit: i64, filter: F, order_key: K) -> Vec<WebhookRecord>
    where
        F: Fn(&WebhookRecord) -> bool,
        K: Fn(&WebhookRecord) -> O,
        O: Ord,
    {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let mut selected = self
            .records
            .lock()
            .await
            .iter()
            .filter(|record| filter(record))
            .cloned()
            .collect::<Vec<_>>();
        selected.sort_by_key(|record| order_key(record));
        selected.truncate(limit);
        selected
    }
}

impl WebhookStore for InMemoryWebhookStore {
    fn enqueue_webhook<'a>(
        &'a self,
        payload: &'a [u8],
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Uuid> {
        Box::pin(async move {
            self.ensure_available()?;
            if max_retries <= 0 {
                return Err(StoreError::InvalidData(
                    "max_retries must be > 0".to_string(),
                ));
            }

            let record = WebhookRecord::new_pending(payload.to_vec(), max_retries, now);
            let id = record.id;
            self.records.lock().await.push(record);
            Ok(id)
        })
    }

    fn get_webhook<'a>(&'a self, id: Uuid) -> StoreFuture<'a, Option<WebhookRecord>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self
                .records
                .lock()
                .await
                .iter()
                .find(|record| record.id == id)
                .cloned())
        })
    }

    fn list_pending<'a>(&'a self, limit: i64) -> StoreFuture<'a, Vec<WebhookRecord>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self
                .select(
                    limit,
                    |record| record.status == WebhookStatus::Pending,
                    |record| (record.created_at, record.id),
                )
                .await)
        })
    }

    fn list_failed_due<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'a, Vec<WebhookRecord>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self
                .select(
                    limit,
                    |record| record.status == WebhookStatus::Failed && record.is_eligible(now),
                    |record| (record.next_retry_at, record.created_at, record.id),
                )
                .await)
        })
    }

    fn list_stale_processing<'a>(
        &'a self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'a, Vec<WebhookRecord>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self
                .select(
                    limit,
                    |record| {
                        record.status == WebhookStatus::Processing
                            && record
                                .last_attempt_at
                                .is_some_and(|last_attempt_at| last_attempt_at <= cutoff)
                    },
                    |record| (record.last_attempt_at, record.id),
                )
                .await)
        })
    }

    fn list_dead_letters<'a>(&'a self, limit: i64) -> StoreFuture<'a, Vec<WebhookRecord>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self
                .select(
                    limit,
                    |record| record.status == WebhookStatus::DeadLetter,
                    |record| (Reverse(record.last_attempt_at), record.id),
                )
                .await)
        })
    }

    fn claim<'a>(
        &'a self,
        id: Uuid,
        expected: WebhookStatus,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.ensure_available()?;
            let mut records = self.records.lock().await;
            let Some(record) = records.iter_mut().find(|record| record.id == id) else {
                return Ok(false);
            };
            if record.status != expected || !record.is_eligible(now) {
                return Ok(false);
            }

            record.mark_claimed(now);
            Ok(true)
        })
    }

    fn update_status<'a>(&'a self, record: &'a WebhookRecord) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.ensure_available()?;
            let mut records = self.records.lock().await;
            let Some(stored) = records.iter_mut().find(|stored| stored.id == record.id) else {
                return Ok(false);
            };
            if stored.status != WebhookStatus::Processing
                || stored.last_attempt_at != record.last_attempt_at
            {
                return Ok(false);
            }

            stored.status = record.status;
            stored.retry_count = record.retry_count;
            stored.next_retry_at = record.next_retry_at;
            stored.processed_at = record.processed_at;
            stored.last_error = record.last_error.clone();
            stored.error_detail = record.error_detail.clone();
            Ok(true)
        })
    }

    fn count_due<'a>(&'a self, now: DateTime<Utc>) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            self.ensure_available()?;
            let count = self
                .records
                .lock()
                .await
                .iter()
                .filter(|record| record.is_eligible(now))
                .count();
            Ok(i64::try_from(count).unwrap_or(i64::MAX))
        })
    }
}
