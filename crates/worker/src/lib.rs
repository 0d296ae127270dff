//! Background retry engine for payment-provider webhooks.
//!
//! Callbacks are persisted as `Pending` records by the receiving service. The
//! [`RetryScheduler`] claims them on a fixed tick, hands each payload to a
//! [`shared::processor::WebhookProcessor`], and records the outcome: processed,
//! failed with a backoff, or dead-lettered once the retry budget is spent.
//! Delivery is at-least-once.

mod clock;
mod http_processor;
mod scheduler;
mod types;
mod webhook_processing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use http_processor::{HttpProcessorBuildError, HttpWebhookProcessor, IDEMPOTENCY_KEY_HEADER};
pub use scheduler::{RetryScheduler, SchedulerHandle, SchedulerSettings};
pub use types::{TickError, WebhookTickMetrics};
