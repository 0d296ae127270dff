use chrono::{DateTime, Utc};
use shared::repos::StoreError;
use thiserror::Error;

/// A failure that aborts a whole tick. Per-record failures never surface here.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("failed to list webhooks: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookTickMetrics {
    pub stale_recovered: usize,
    pub selected_pending: usize,
    pub selected_failed: usize,
    pub claimed: usize,
    pub claim_skipped: usize,
    pub processed: usize,
    pub retries_scheduled: usize,
    pub dead_lettered: usize,
    pub timed_out: usize,
    pub outcome_write_failures: usize,
    /// Records still due at the end of the tick; `None` when the count failed.
    pub due_webhooks: Option<i64>,
    pub total_lag_seconds: i64,
    pub max_lag_seconds: i64,
}

impl WebhookTickMetrics {
    pub(crate) fn record_lag(&mut self, due_at: DateTime<Utc>, now: DateTime<Utc>) {
        let lag_seconds = (now - due_at).num_seconds().max(0);
        self.total_lag_seconds += lag_seconds;
        self.max_lag_seconds = self.max_lag_seconds.max(lag_seconds);
    }

    pub fn attempts(&self) -> usize {
        self.processed + self.retries_scheduled + self.dead_lettered
    }

    pub fn average_lag_seconds(&self) -> f64 {
        if self.claimed == 0 {
            return 0.0;
        }

        self.total_lag_seconds as f64 / self.claimed as f64
    }

    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            return 1.0;
        }

        self.processed as f64 / attempts as f64
    }
}
