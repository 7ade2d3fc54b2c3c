//! Bounded retry with jittered exponential backoff and a hard deadline.

use super::BackendError;
use crate::config::AgentsConfig;
use rand_core::{OsRng, RngCore};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Covers every attempt and every backoff sleep.
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AgentsConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            deadline: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Delay before retry number `attempt` (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff with jitter drawn from [delay / 2, delay].
    fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let half = delay / 2;
        let spread = (delay - half).as_millis() as u64;
        if spread == 0 {
            return delay;
        }
        half + Duration::from_millis(OsRng.next_u64() % (spread + 1))
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// hits the deadline or is cancelled.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let deadline = Instant::now() + self.deadline;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                outcome = tokio::time::timeout_at(deadline, op(attempt)) => outcome,
            };

            let err = match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => return Err(BackendError::DeadlineExceeded { attempts: attempt }),
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.jittered(attempt);
            if Instant::now() + delay >= deadline {
                return Err(BackendError::DeadlineExceeded { attempts: attempt });
            }

            warn!(
                "Backend call failed (attempt {}/{}): {}. Retrying in {}ms",
                attempt,
                self.max_attempts,
                err,
                delay.as_millis()
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
