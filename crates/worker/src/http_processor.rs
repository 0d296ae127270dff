use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use shared::processor::{ProcessFuture, ProcessOutcome, WebhookProcessor};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Forwards decoded callbacks to the payment service, which owns payment and
/// enrollment state.
///
/// The webhook id is sent as the idempotency key so the payment service can
/// drop repeated deliveries of the same callback.
#[derive(Clone)]
pub struct HttpWebhookProcessor {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum HttpProcessorBuildError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

impl HttpWebhookProcessor {
    pub fn new(
        endpoint: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HttpProcessorBuildError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            auth_token,
        })
    }

    async fn forward(&self, webhook_id: Uuid, payload: &[u8]) -> ProcessOutcome {
        let decoded: Value = match serde_json::from_slice(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                return ProcessOutcome::failure(
                    "PAYLOAD_DECODE_FAILED",
                    format!("webhook payload is not valid JSON: {err}"),
                );
            }
        };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_KEY_HEADER, webhook_id.to_string())
            .json(&decoded);
        if let Some(auth_token) = self.auth_token.as_deref() {
            builder = builder.bearer_auth(auth_token);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return ProcessOutcome::failure(
                    "PAYMENT_SERVICE_TIMEOUT",
                    format!("payment service request timed out: {err}"),
                );
            }
            Err(err) => {
                return ProcessOutcome::failure(
                    "PAYMENT_SERVICE_NETWORK_ERROR",
                    format!("payment service request failed: {err}"),
                );
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(
                webhook_id = %webhook_id,
                status = status.as_u16(),
                "payment service accepted webhook"
            );
            return ProcessOutcome::Success;
        }

        let body = response.text().await.unwrap_or_default();
        ProcessOutcome::failure(failure_code(status), failure_message(status, &body))
    }
}

impl WebhookProcessor for HttpWebhookProcessor {
    fn process<'a>(&'a self, webhook_id: Uuid, payload: &'a [u8]) -> ProcessFuture<'a> {
        Box::pin(self.forward(webhook_id, payload))
    }
}

fn failure_code(status: StatusCode) -> String {
    format!("PAYMENT_SERVICE_HTTP_{}", status.as_u16())
}

fn failure_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("payment service responded with status {status}")
    } else {
        format!("payment service responded with status {status}: {body}")
    }
}
