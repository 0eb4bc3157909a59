use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::GeneBatchError;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_backoff: Duration::from_millis(2000),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Runs `call` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` transient failures have been seen. Exhaustion is reported
    /// as [`GeneBatchError::RetriesExhausted`] carrying the last error.
    pub fn run<T, F>(&self, label: &str, mut call: F) -> Result<T, GeneBatchError>
    where
        F: FnMut() -> Result<T, GeneBatchError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1usize;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    debug!(label, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(GeneBatchError::RetriesExhausted {
                        label: label.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Uniform jitter in `[min, max]`, scaled by the attempt number.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let min = self.min_backoff.as_millis() as u64;
        let max = (self.max_backoff.as_millis() as u64).max(min);
        let base = if max == min {
            min
        } else {
            rand::rng().random_range(min..=max)
        };
        Duration::from_millis(base.saturating_mul(attempt as u64))
    }
}
