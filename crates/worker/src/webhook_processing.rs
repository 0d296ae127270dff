use std::sync::Arc;
use std::time::Duration;

use shared::models::{FailureDisposition, WebhookRecord};
use shared::processor::{ProcessOutcome, WebhookProcessor};
use shared::repos::WebhookStore;
use shared::retry_policy::RetryPolicy;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::WebhookTickMetrics;
use crate::clock::Clock;

pub(crate) const PROCESSOR_TIMEOUT_CODE: &str = "PROCESSOR_TIMEOUT";
pub(crate) const PROCESSOR_PANICKED_CODE: &str = "PROCESSOR_PANICKED";
pub(crate) const LEASE_EXPIRED_CODE: &str = "PROCESSING_LEASE_EXPIRED";

pub(crate) struct ProcessingRuntime<'a, S, P, C> {
    pub(crate) store: &'a S,
    pub(crate) processor: &'a Arc<P>,
    pub(crate) clock: &'a C,
    pub(crate) retry_policy: &'a RetryPolicy,
    pub(crate) processor_timeout: Duration,
}

/// Claims one eligible record, runs the processor and persists the outcome.
pub(crate) async fn process_webhook<S, P, C>(
    runtime: &ProcessingRuntime<'_, S, P, C>,
    mut record: WebhookRecord,
    metrics: &mut WebhookTickMetrics,
) where
    S: WebhookStore,
    P: WebhookProcessor + 'static,
    C: Clock,
{
    let claimed_at = runtime.clock.now();
    match runtime
        .store
        .claim(record.id, record.status, claimed_at)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            metrics.claim_skipped += 1;
            warn!(
                webhook_id = %record.id,
                status = record.status.as_str(),
                "webhook claim skipped because the record is no longer eligible"
            );
            return;
        }
        Err(err) => {
            metrics.claim_skipped += 1;
            error!(webhook_id = %record.id, "failed to claim webhook: {err}");
            return;
        }
    }

    metrics.claimed += 1;
    metrics.record_lag(record.next_retry_at.unwrap_or(record.created_at), claimed_at);
    record.mark_claimed(claimed_at);
    debug!(
        webhook_id = %record.id,
        retry_count = record.retry_count,
        "webhook claimed"
    );

    let outcome = invoke_processor(runtime, &record, metrics).await;
    let finished_at = runtime.clock.now();

    match outcome {
        ProcessOutcome::Success => {
            record.mark_processed(finished_at);
            if persist_outcome(runtime, &record, metrics).await {
                metrics.processed += 1;
                info!(
                    webhook_id = %record.id,
                    retry_count = record.retry_count,
                    "webhook processed"
                );
            }
        }
        ProcessOutcome::Failure { code, message } => {
            record_failed_attempt(runtime, record, &code, &message, metrics).await;
        }
    }
}

/// Treats a claim that outlived the processing lease as a failed attempt.
pub(crate) async fn recover_stale_webhook<S, P, C>(
    runtime: &ProcessingRuntime<'_, S, P, C>,
    record: WebhookRecord,
    metrics: &mut WebhookTickMetrics,
) where
    S: WebhookStore,
    P: WebhookProcessor + 'static,
    C: Clock,
{
    warn!(
        webhook_id = %record.id,
        last_attempt_at = ?record.last_attempt_at,
        "webhook processing lease expired"
    );
    let before = metrics.attempts();
    record_failed_attempt(
        runtime,
        record,
        LEASE_EXPIRED_CODE,
        "processing claim expired before an outcome was recorded",
        metrics,
    )
    .await;
    if metrics.attempts() > before {
        metrics.stale_recovered += 1;
    }
}

async fn invoke_processor<S, P, C>(
    runtime: &ProcessingRuntime<'_, S, P, C>,
    record: &WebhookRecord,
    metrics: &mut WebhookTickMetrics,
) -> ProcessOutcome
where
    P: WebhookProcessor + 'static,
{
    let processor = Arc::clone(runtime.processor);
    let webhook_id = record.id;
    let payload = record.payload.clone();
    let mut handle = tokio::spawn(async move { processor.process(webhook_id, &payload).await });

    match time::timeout(runtime.processor_timeout, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => ProcessOutcome::failure(
            PROCESSOR_PANICKED_CODE,
            format!("webhook processor aborted: {join_err}"),
        ),
        Err(_) => {
            handle.abort();
            metrics.timed_out += 1;
            ProcessOutcome::failure(
                PROCESSOR_TIMEOUT_CODE,
                format!(
                    "webhook processor timed out after {} ms",
                    runtime.processor_timeout.as_millis()
                ),
            )
        }
    }
}

async fn record_failed_attempt<S, P, C>(
    runtime: &ProcessingRuntime<'_, S, P, C>,
    mut record: WebhookRecord,
    code: &str,
    message: &str,
    metrics: &mut WebhookTickMetrics,
) where
    S: WebhookStore,
    C: Clock,
{
    let failed_at = runtime.clock.now();
    let disposition = record.record_failure(code, message, failed_at, runtime.retry_policy);
    if !persist_outcome(runtime, &record, metrics).await {
        return;
    }

    match disposition {
        FailureDisposition::RetryScheduled { next_retry_at } => {
            metrics.retries_scheduled += 1;
            info!(
                webhook_id = %record.id,
                retry_count = record.retry_count,
                max_retries = record.max_retries,
                next_retry_at = %next_retry_at,
                error_code = code,
                "webhook scheduled for retry"
            );
        }
        FailureDisposition::DeadLettered => {
            metrics.dead_lettered += 1;
            warn!(
                webhook_id = %record.id,
                retry_count = record.retry_count,
                error_code = code,
                error_detail = message,
                "webhook dead-lettered"
            );
        }
    }
}

async fn persist_outcome<S, P, C>(
    runtime: &ProcessingRuntime<'_, S, P, C>,
    record: &WebhookRecord,
    metrics: &mut WebhookTickMetrics,
) -> bool
where
    S: WebhookStore,
{
    match runtime.store.update_status(record).await {
        Ok(true) => true,
        Ok(false) => {
            metrics.outcome_write_failures += 1;
            warn!(
                webhook_id = %record.id,
                status = record.status.as_str(),
                "webhook outcome skipped because the claim was lost"
            );
            false
        }
        Err(err) => {
            metrics.outcome_write_failures += 1;
            error!(
                webhook_id = %record.id,
                status = record.status.as_str(),
                "failed to persist webhook outcome: {err}"
            );
            false
        }
    }
}
