use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry_policy::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    DeadLetter,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
            Self::DeadLetter => "DEAD_LETTER",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "PROCESSED" => Some(Self::Processed),
            "FAILED" => Some(Self::Failed),
            "DEAD_LETTER" => Some(Self::DeadLetter),
            _ => None,
        }
    }
}

/// A queued payment-provider callback and its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRecord {
    pub id: Uuid,
    pub payload: Vec<u8>,
    pub status: WebhookStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Short failure code of the most recent failed attempt. Kept after a
    /// later success.
    pub last_error: Option<String>,
    pub error_detail: Option<String>,
}

/// What a failed attempt did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    RetryScheduled { next_retry_at: DateTime<Utc> },
    DeadLettered,
}

impl WebhookRecord {
    pub fn new_pending(payload: Vec<u8>, max_retries: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            status: WebhookStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: now,
            last_attempt_at: None,
            next_retry_at: None,
            processed_at: None,
            last_error: None,
            error_detail: None,
        }
    }

    /// Pending records are always eligible; failed ones once their retry time
    /// has passed.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            WebhookStatus::Pending => true,
            WebhookStatus::Failed => self
                .next_retry_at
                .is_some_and(|next_retry_at| next_retry_at <= now),
            _ => false,
        }
    }

    pub fn mark_claimed(&mut self, now: DateTime<Utc>) {
        self.status = WebhookStatus::Processing;
        self.last_attempt_at = Some(now);
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = WebhookStatus::Processed;
        self.processed_at = Some(now);
        self.next_retry_at = None;
    }

    pub fn record_failure(
        &mut self,
        code: &str,
        message: &str,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> FailureDisposition {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(code.to_string());
        self.error_detail = Some(message.to_string());

        if self.retry_count >= self.max_retries {
            self.status = WebhookStatus::DeadLetter;
            self.next_retry_at = None;
            return FailureDisposition::DeadLettered;
        }

        let attempt = u32::try_from(self.retry_count).unwrap_or(u32::MAX);
        let next_retry_at = ChronoDuration::from_std(policy.delay_for(attempt))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.status = WebhookStatus::Failed;
        self.next_retry_at = Some(next_retry_at);
        FailureDisposition::RetryScheduled { next_retry_at }
    }
}
