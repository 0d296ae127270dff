#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use shared::models::{WebhookRecord, WebhookStatus};
use shared::processor::{ProcessFuture, ProcessOutcome, WebhookProcessor};
use shared::repos::InMemoryWebhookStore;
use tokio::sync::Mutex;
use uuid::Uuid;
use webhook_worker::{ManualClock, RetryScheduler, SchedulerSettings};

pub type TestScheduler = RetryScheduler<InMemoryWebhookStore, ScriptedProcessor, ManualClock>;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("fixed timestamp should be valid")
}

pub fn test_settings() -> SchedulerSettings {
    SchedulerSettings {
        processor_timeout: Duration::from_secs(5),
        ..SchedulerSettings::default()
    }
}

pub fn scheduler_for(
    store: &InMemoryWebhookStore,
    processor: &ScriptedProcessor,
    clock: &ManualClock,
) -> TestScheduler {
    RetryScheduler::with_clock(
        Arc::new(store.clone()),
        Arc::new(processor.clone()),
        Arc::new(clock.clone()),
        test_settings(),
    )
}

pub async fn record(store: &InMemoryWebhookStore, id: Uuid) -> WebhookRecord {
    store
        .snapshot()
        .await
        .into_iter()
        .find(|record| record.id == id)
        .expect("record should exist")
}

pub fn record_in_state(
    status: WebhookStatus,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
) -> WebhookRecord {
    let mut record = WebhookRecord::new_pending(br#"{"payment_id":"pay_1"}"#.to_vec(), 5, t0());
    record.status = status;
    record.retry_count = retry_count;
    record.next_retry_at = next_retry_at;
    record
}

/// Processor that replays scripted outcomes and records every call.
#[derive(Clone)]
pub struct ScriptedProcessor {
    outcomes: Arc<Mutex<VecDeque<ProcessOutcome>>>,
    fallback: ProcessOutcome,
    calls: Arc<Mutex<Vec<Uuid>>>,
}

impl ScriptedProcessor {
    pub fn always_succeeds() -> Self {
        Self::with_outcomes(Vec::new(), ProcessOutcome::Success)
    }

    pub fn always_fails() -> Self {
        Self::with_outcomes(
            Vec::new(),
            ProcessOutcome::failure("PAYMENT_SERVICE_HTTP_503", "payment service unavailable"),
        )
    }

    pub fn with_outcomes(outcomes: Vec<ProcessOutcome>, fallback: ProcessOutcome) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::from(outcomes))),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().await.clone()
    }
}

impl WebhookProcessor for ScriptedProcessor {
    fn process<'a>(&'a self, webhook_id: Uuid, _payload: &'a [u8]) -> ProcessFuture<'a> {
        Box::pin(async move {
            self.calls.lock().await.push(webhook_id);
            self.outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        })
    }
}

pub fn transient_failure(message: &str) -> ProcessOutcome {
    ProcessOutcome::failure("PAYMENT_SERVICE_HTTP_503", message)
}
