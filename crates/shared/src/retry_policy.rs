use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BACKOFF_SECONDS: [u64; 5] = [60, 300, 900, 3_600, 21_600];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryPolicyError {
    #[error("backoff table must contain at least one delay")]
    EmptyTable,
    #[error("backoff delay at position {0} must be greater than zero")]
    ZeroDelay(usize),
}

/// Backoff table for failed webhook deliveries.
///
/// Attempt `n` waits `delays[n - 1]`; attempts past the end of the table reuse
/// the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Result<Self, RetryPolicyError> {
        if delays.is_empty() {
            return Err(RetryPolicyError::EmptyTable);
        }
        if let Some(position) = delays.iter().position(Duration::is_zero) {
            return Err(RetryPolicyError::ZeroDelay(position));
        }
        Ok(Self { delays })
    }

    pub fn from_seconds(seconds: &[u64]) -> Result<Self, RetryPolicyError> {
        Self::new(seconds.iter().copied().map(Duration::from_secs).collect())
    }

    /// Attempt numbers start at 1; 0 is treated as the first attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .min(self.delays.len() - 1);
        self.delays[index]
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_SECONDS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }
}
