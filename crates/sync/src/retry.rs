//! Bounded retry with exponential backoff for target calls.

use crate::error::{SyncError, TargetError};
use std::future::Future;
use std::time::Duration;

/// Retry schedule for transient target failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 to disable).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Default schedule with a different retry count.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            jitter: 0.0,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Delay before retry number `retry` (1-based), jitter included.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let base = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter > 0.0 {
            base * self.jitter * rand::random::<f64>()
        } else {
            0.0
        };
        Duration::from_secs_f64(base + jitter)
    }

    /// Runs `op` until it succeeds, fails terminally, or retries run out.
    ///
    /// A `Retry-After` hint can raise a delay up to `max_delay`. Terminal
    /// failures come back as [`SyncError::Target`]; exhausted retries as
    /// [`SyncError::Transient`].
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TargetError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(SyncError::Target(err));
            }
            if attempt > self.max_retries {
                tracing::warn!(op = label, attempts = attempt, error = %err, "retries exhausted");
                return Err(SyncError::Transient {
                    attempts: attempt,
                    last: err,
                });
            }

            let mut delay = self.backoff(attempt);
            if let Some(hint) = err.retry_after() {
                // server hints never exceed the policy ceiling
                delay = delay.max(hint.min(self.max_delay));
            }
            tracing::warn!(
                op = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient target failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
