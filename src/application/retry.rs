use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TaskCanceled;
use crate::ports::platform::ReadyState;

/// Longest single sleep between two checks.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Sleep after the `attempt`-th (1-based) unsuccessful check, capped at
    /// [`MAX_RETRY_DELAY`]. A multiplier that yields no finite, non-negative
    /// delay falls back to the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(MAX_RETRY_DELAY))
            .unwrap_or(MAX_RETRY_DELAY)
    }
}

/// Waits for an asynchronous remote condition.
#[derive(Debug, Clone)]
pub struct RetryPoller {
    policy: RetryPolicy,
}

impl RetryPoller {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// `true` on the first `Ready`, `false` once attempts run out. Errors
    /// from `check` count as not ready.
    pub async fn poll_until_ready<F, Fut, E>(&self, check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ReadyState, E>>,
        E: Display,
    {
        self.poll_until_ready_or_canceled(check, || Ok(()))
            .await
            .unwrap_or(false)
    }

    /// Like [`poll_until_ready`](Self::poll_until_ready), running `checkpoint`
    /// right after every backoff sleep.
    pub async fn poll_until_ready_or_canceled<F, Fut, E, C>(
        &self,
        mut check: F,
        mut checkpoint: C,
    ) -> Result<bool, TaskCanceled>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ReadyState, E>>,
        E: Display,
        C: FnMut() -> Result<(), TaskCanceled>,
    {
        for attempt in 1..=self.policy.max_attempts {
            match check().await {
                Ok(ReadyState::Ready) => return Ok(true),
                Ok(ReadyState::Pending) => {
                    debug!(attempt, max = self.policy.max_attempts, "not ready yet");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "readiness check failed, retrying");
                }
            }

            tokio::time::sleep(self.policy.delay_for(attempt)).await;
            checkpoint()?;
        }
        Ok(false)
    }
}
