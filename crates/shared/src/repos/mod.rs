use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{WebhookRecord, WebhookStatus};

mod memory;
mod webhooks;

pub use memory::InMemoryWebhookStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence for queued webhook callbacks.
///
/// `claim` and `update_status` are conditional writes: they report `false`
/// when the record was no longer in the state the caller expected.
pub trait WebhookStore: Send + Sync {
    /// Ingestion boundary: inserts a new `Pending` record.
    fn enqueue_webhook<'a>(
        &'a self,
        payload: &'a [u8],
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Uuid>;

    fn get_webhook<'a>(&'a self, id: Uuid) -> StoreFuture<'a, Option<WebhookRecord>>;

    fn list_pending<'a>(&'a self, limit: i64) -> StoreFuture<'a, Vec<WebhookRecord>>;

    fn list_failed_due<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'a, Vec<WebhookRecord>>;

    /// Records stuck in `Processing` whose claim is at or before `cutoff`.
    fn list_stale_processing<'a>(
        &'a self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'a, Vec<WebhookRecord>>;

    fn list_dead_letters<'a>(&'a self, limit: i64) -> StoreFuture<'a, Vec<WebhookRecord>>;

    /// Moves an eligible record in `expected` state to `Processing`.
    fn claim<'a>(
        &'a self,
        id: Uuid,
        expected: WebhookStatus,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, bool>;

    /// Persists the outcome of an attempt in one write. Only applies while the
    /// stored record is still `Processing` under the same claim.
    fn update_status<'a>(&'a self, record: &'a WebhookRecord) -> StoreFuture<'a, bool>;

    fn count_due<'a>(&'a self, now: DateTime<Utc>) -> StoreFuture<'a, i64>;
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self, migrations_dir: &Path) -> Result<(), StoreError> {
        let migrator = sqlx::migrate::Migrator::new(migrations_dir.to_path_buf()).await?;
        migrator.run(&self.pool).await?;
        info!(
            migrations_dir = %migrations_dir.display(),
            "database migrations applied"
        );
        Ok(())
    }
}
