use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shared::config::WorkerConfig;
use shared::processor::WebhookProcessor;
use shared::repos::WebhookStore;
use shared::retry_policy::RetryPolicy;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::webhook_processing::{ProcessingRuntime, process_webhook, recover_stale_webhook};
use crate::{TickError, WebhookTickMetrics};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub error_backoff: Duration,
    pub batch_size: i64,
    pub processor_timeout: Duration,
    pub processing_lease: Duration,
    pub retry_policy: RetryPolicy,
}

impl SchedulerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            error_backoff: config.error_backoff(),
            batch_size: i64::from(config.batch_size),
            processor_timeout: config.processor_timeout(),
            processing_lease: config.processing_lease(),
            retry_policy: config.retry_policy.clone(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(300),
            batch_size: 100,
            processor_timeout: Duration::from_secs(30),
            processing_lease: Duration::from_secs(900),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Drives queued webhook records to `Processed` or `DeadLetter`.
///
/// Each tick recovers expired claims, then processes every `Pending` record
/// followed by every `Failed` record whose retry time has passed. A tick that
/// cannot read the store is retried after `error_backoff` instead of
/// `tick_interval`.
pub struct RetryScheduler<S, P, C = SystemClock> {
    store: Arc<S>,
    processor: Arc<P>,
    clock: Arc<C>,
    settings: SchedulerSettings,
}

impl<S, P> RetryScheduler<S, P, SystemClock>
where
    S: WebhookStore + 'static,
    P: WebhookProcessor + 'static,
{
    pub fn new(store: Arc<S>, processor: Arc<P>, settings: SchedulerSettings) -> Self {
        Self::with_clock(store, processor, Arc::new(SystemClock), settings)
    }
}

impl<S, P, C> RetryScheduler<S, P, C>
where
    S: WebhookStore + 'static,
    P: WebhookProcessor + 'static,
    C: Clock + 'static,
{
    pub fn with_clock(
        store: Arc<S>,
        processor: Arc<P>,
        clock: Arc<C>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            processor,
            clock,
            settings,
        }
    }

    /// Starts the loop on the tokio runtime. The first tick runs immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });
        SchedulerHandle { shutdown_tx, task }
    }

    /// Runs ticks until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_seconds = self.settings.tick_interval.as_secs(),
            error_backoff_seconds = self.settings.error_backoff.as_secs(),
            batch_size = self.settings.batch_size,
            "webhook retry scheduler starting"
        );

        let mut delay = Duration::ZERO;
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = time::sleep(delay) => {}
            }

            delay = match self.tick(Some(&shutdown)).await {
                Ok(_) => self.settings.tick_interval,
                Err(err) => {
                    error!(
                        error_backoff_seconds = self.settings.error_backoff.as_secs(),
                        "webhook tick failed: {err}"
                    );
                    self.settings.error_backoff
                }
            };
        }

        info!("webhook retry scheduler stopped");
    }

    /// Runs a single tick to completion.
    pub async fn run_tick(&self) -> Result<WebhookTickMetrics, TickError> {
        self.tick(None).await
    }

    async fn tick(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<WebhookTickMetrics, TickError> {
        let now = self.clock.now();
        let lease = ChronoDuration::from_std(self.settings.processing_lease)
            .unwrap_or(ChronoDuration::MAX);
        let stale_cutoff = now
            .checked_sub_signed(lease)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let batch_size = self.settings.batch_size;

        let stale = self
            .store
            .list_stale_processing(stale_cutoff, batch_size)
            .await?;
        let pending = self.store.list_pending(batch_size).await?;
        let failed = self.store.list_failed_due(now, batch_size).await?;

        let mut metrics = WebhookTickMetrics {
            selected_pending: pending.len(),
            selected_failed: failed.len(),
            ..WebhookTickMetrics::default()
        };

        let runtime = ProcessingRuntime {
            store: self.store.as_ref(),
            processor: &self.processor,
            clock: self.clock.as_ref(),
            retry_policy: &self.settings.retry_policy,
            processor_timeout: self.settings.processor_timeout,
        };

        for record in stale {
            if shutdown_requested(shutdown) {
                break;
            }
            recover_stale_webhook(&runtime, record, &mut metrics).await;
        }

        for record in pending.into_iter().chain(failed) {
            if shutdown_requested(shutdown) {
                info!(
                    webhook_id = %record.id,
                    "shutdown requested; leaving remaining webhooks for the next run"
                );
                break;
            }
            process_webhook(&runtime, record, &mut metrics).await;
        }

        metrics.due_webhooks = match self.store.count_due(self.clock.now()).await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!("failed to count due webhooks: {err}");
                None
            }
        };

        info!(
            due_webhooks = ?metrics.due_webhooks,
            stale_recovered = metrics.stale_recovered,
            selected_pending = metrics.selected_pending,
            selected_failed = metrics.selected_failed,
            claimed = metrics.claimed,
            claim_skipped = metrics.claim_skipped,
            processed = metrics.processed,
            retries_scheduled = metrics.retries_scheduled,
            dead_lettered = metrics.dead_lettered,
            timed_out = metrics.timed_out,
            outcome_write_failures = metrics.outcome_write_failures,
            average_lag_seconds = metrics.average_lag_seconds(),
            max_lag_seconds = metrics.max_lag_seconds,
            success_rate = metrics.success_rate(),
            "webhook tick metrics"
        );

        Ok(metrics)
    }
}

fn shutdown_requested(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|receiver| *receiver.borrow())
}

/// Owner of a spawned scheduler loop.
///
/// Dropping the handle without calling [`SchedulerHandle::shutdown`] also stops
/// the loop at its next wake-up.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop and waits for it to exit. A record that is already
    /// claimed is finalized first.
    pub async fn shutdown(self) {
        self.request_shutdown();
        if let Err(err) = self.task.await {
            error!("webhook retry scheduler task failed: {err}");
        }
    }

    /// Signals the loop without waiting for it.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
