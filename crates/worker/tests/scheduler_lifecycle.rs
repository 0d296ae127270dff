mod support;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use shared::models::{WebhookRecord, WebhookStatus};
use shared::processor::{ProcessFuture, ProcessOutcome, WebhookProcessor};
use shared::repos::{InMemoryWebhookStore, StoreFuture, WebhookStore};
use support::{ScriptedProcessor, record, t0, test_settings};
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;
use webhook_worker::{ManualClock, RetryScheduler};

#[tokio::test(start_paused = true)]
async fn store_outage_switches_loop_to_error_backoff() {
    let inner = InMemoryWebhookStore::new();
    let id = inner
        .enqueue_webhook(br#"{"payment_id":"pay_1"}"#, 5, t0())
        .await
        .expect("enqueue should succeed");
    inner.set_unavailable(true);
    let store = TickRecordingStore::new(inner.clone());
    let tick_starts = Arc::clone(&store.tick_starts);
    let processor = ScriptedProcessor::always_succeeds();

    let handle = RetryScheduler::with_clock(
        Arc::new(store),
        Arc::new(processor.clone()),
        Arc::new(ManualClock::new(t0())),
        test_settings(),
    )
    .spawn();

    tokio::time::sleep(Duration::from_secs(650)).await;
    let failing_ticks = tick_starts_snapshot(&tick_starts);
    assert_eq!(failing_ticks.len(), 3);
    for pair in failing_ticks.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(300), "gap {gap:?} shorter than backoff");
        assert!(gap < Duration::from_secs(360), "gap {gap:?} longer than expected");
    }
    assert!(processor.calls().await.is_empty());
    assert_eq!(record(&inner, id).await.status, WebhookStatus::Pending);

    inner.set_unavailable(false);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(record(&inner, id).await.status, WebhookStatus::Processed);
    assert_eq!(tick_starts_snapshot(&tick_starts).len(), 4);

    tokio::time::sleep(Duration::from_secs(120)).await;
    let ticks = tick_starts_snapshot(&tick_starts);
    assert_eq!(ticks.len(), 6);
    let healthy_gap = ticks[5] - ticks[4];
    assert!(healthy_gap >= Duration::from_secs(60));
    assert!(healthy_gap < Duration::from_secs(61));

    handle.shutdown().await;
    assert_eq!(processor.calls().await, vec![id]);
}

#[tokio::test]
async fn shutdown_finishes_claimed_record_and_leaves_the_rest_pending() {
    let store = InMemoryWebhookStore::new();
    let first = store
        .enqueue_webhook(br#"{"payment_id":"pay_2"}"#, 5, t0())
        .await
        .expect("enqueue should succeed");
    let second = store
        .enqueue_webhook(
            br#"{"payment_id":"pay_3"}"#,
            5,
            t0() + chrono::Duration::seconds(1),
        )
        .await
        .expect("enqueue should succeed");
    let processor = GatedProcessor::default();

    let handle = RetryScheduler::with_clock(
        Arc::new(store.clone()),
        Arc::new(processor.clone()),
        Arc::new(ManualClock::new(t0())),
        test_settings(),
    )
    .spawn();

    processor.started.notified().await;
    handle.request_shutdown();
    processor.release.notify_one();
    handle.shutdown().await;

    assert_eq!(record(&store, first).await.status, WebhookStatus::Processed);
    assert_eq!(record(&store, second).await.status, WebhookStatus::Pending);
}

#[tokio::test]
async fn shutdown_before_first_tick_touches_nothing() {
    let store = InMemoryWebhookStore::new();
    let id = store
        .enqueue_webhook(br#"{"payment_id":"pay_4"}"#, 5, t0())
        .await
        .expect("enqueue should succeed");
    let processor = ScriptedProcessor::always_succeeds();

    let handle = RetryScheduler::with_clock(
        Arc::new(store.clone()),
        Arc::new(processor.clone()),
        Arc::new(ManualClock::new(t0())),
        test_settings(),
    )
    .spawn();
    handle.shutdown().await;

    assert!(processor.calls().await.is_empty());
    assert_eq!(record(&store, id).await.status, WebhookStatus::Pending);
}

fn tick_starts_snapshot(tick_starts: &StdMutex<Vec<Instant>>) -> Vec<Instant> {
    tick_starts
        .lock()
        .expect("tick log lock should not be poisoned")
        .clone()
}

/// Blocks inside the processor until the test releases it.
#[derive(Clone, Default)]
struct GatedProcessor {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl WebhookProcessor for GatedProcessor {
    fn process<'a>(&'a self, _webhook_id: Uuid, _payload: &'a [u8]) -> ProcessFuture<'a> {
        Box::pin(async move {
            self.started.notify_one();
            self.release.notified().await;
            ProcessOutcome::Success
        })
    }
}

/// Logs the tokio instant at which each tick starts reading the store.
struct TickRecordingStore {
    inner: InMemoryWebhookStore,
    tick_starts: Arc<StdMutex<Vec<Instant>>>,
}

impl TickRecordingStore {
    fn new(inner: InMemoryWebhookStore) -> Self {
        Self {
            inner,
            tick_starts: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

impl WebhookStore for TickRecordingStore {
    fn enqueue_webhook<'a>(
        &'a self,
        payload: &'a [u8],
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Uuid> {
        self.inner.enqueue_webhook(payload, max_retries, now)
    }

    fn get_webhook<'a>(&'a self, id: Uuid) -> StoreFuture<'a, Option<WebhookRecord>> {
        self.inner.get_webhook(id)
    }

    fn list_pending<'a>(&'a self, limit: i64) -> StoreFuture<'a, Vec<WebhookRecord>> {
        self.inner.list_pending(limit)
    }

    fn list_failed_due<'a>(
        &'a self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'a, Vec<WebhookRecord>> {
        self.inner.list_failed_due(now, limit)
    }

    fn list_stale_processing<'a>(
        &'a self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'a, Vec<WebhookRecord>> {
        self.tick_starts
            .lock()
            .expect("tick log lock should not be poisoned")
            .push(Instant::now());
        self.inner.list_stale_processing(cutoff, limit)
    }

    fn list_dead_letters<'a>(&'a self, limit: i64) -> StoreFuture<'a, Vec<WebhookRecord>> {
        self.inner.list_dead_letters(limit)
    }

    fn claim<'a>(
        &'a self,
        id: Uuid,
        expected: WebhookStatus,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, bool> {
        self.inner.claim(id, expected, now)
    }

    fn update_status<'a>(&'a self, record: &'a WebhookRecord) -> StoreFuture<'a, bool> {
        self.inner.update_status(record)
    }

    fn count_due<'a>(&'a self, now: DateTime<Utc>) -> StoreFuture<'a, i64> {
        self.inner.count_due(now)
    }
}
