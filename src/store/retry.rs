//! Bounded retry with exponential backoff, shaped after the teacher's
//! `core::error::retry::RetryPolicy`: fixed attempt budget, base delay
//! doubling each retry, small jitter to avoid synchronized retries
//! across instances.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AggregatorError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let millis = self.base_delay.as_millis() as u64 * 2u64.pow(attempt.saturating_sub(1));
        let jitter = rand::thread_rng().gen_range(0..=millis / 10 + 1);
        Duration::from_millis(millis + jitter)
    }

    /// Run `op`, retrying up to `max_attempts` times while the error is
    /// retryable (spec §4.5/§7: transient connection errors and
    /// timeouts). The first non-retryable error propagates immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AggregatorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AggregatorError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, ?delay, error = %e, "retrying transient store error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
