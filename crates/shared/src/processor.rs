use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

pub type ProcessFuture<'a> = Pin<Box<dyn Future<Output = ProcessOutcome> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    Failure { code: String, message: String },
}

impl ProcessOutcome {
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Applies a payment-provider callback to payment and enrollment state.
///
/// The scheduler delivers each record at least once, so implementations must
/// be idempotent. `webhook_id` is stable across retries and can serve as the
/// idempotency key.
pub trait WebhookProcessor: Send + Sync {
    fn process<'a>(&'a self, webhook_id: Uuid, payload: &'a [u8]) -> ProcessFuture<'a>;
}
