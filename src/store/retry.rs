use std::time::Duration;

use super::StoreError;

/// Fixed schedule retry: a bounded number of attempts with a constant delay,
/// for the transient status codes only. Cancellation is always fatal.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    count: u32,
    delay: Duration,
    retryable: &'static [u16],
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 10,
            delay: Duration::from_secs(1),
            retryable: &[408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before the next attempt, or `None` when the cause is
    /// fatal or the budget is spent.
    pub(crate) fn backoff(&mut self, cause: &StoreError) -> Option<Duration> {
        let transient = match cause {
            StoreError::Cancelled => false,
            StoreError::Status { status, .. } => self.retryable.contains(status),
            StoreError::Http(_) => true,
            StoreError::Decode(_) => false,
        };

        if !transient || self.count == 0 {
            return None;
        }

        self.count -= 1;
        Some(self.delay)
    }
}
