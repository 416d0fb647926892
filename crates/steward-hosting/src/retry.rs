//! Timeout and bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HostingError, HostingResult};

/// Per-call controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Wall-clock limit for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Retries after the first attempt (0 = run once).
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `backoff_base_ms * 2^(n-1)`.
    pub backoff_base_ms: u64,
}

impl RetryPolicy {
    /// Reads: three retries.
    pub fn fetch() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }

    /// Mutations: exactly one retry.
    pub fn mutation() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 1,
            backoff_base_ms: 1_000,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_backoff_base_ms(mut self, backoff_base_ms: u64) -> Self {
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Delay before the retry that follows attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. Returns the value and the number of attempts used.
    pub async fn run<F, Fut, T>(&self, what: &str, op: F) -> HostingResult<(T, u32)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = HostingResult<T>>,
    {
        let max_attempts = self.max_retries + 1;
        let limit = Duration::from_millis(self.timeout_ms);
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(limit, op()).await {
                Ok(Ok(value)) => return Ok((value, attempt)),
                Ok(Err(err)) => err,
                Err(_elapsed) => HostingError::Timeout {
                    limit_ms: self.timeout_ms,
                },
            };
            if attempt >= max_attempts || !err.is_retryable() {
                return Err(err);
            }
            let delay = match &err {
                HostingError::RateLimited {
                    retry_after_secs: Some(secs),
                } => Duration::from_secs(*secs).max(self.backoff(attempt)),
                _ => self.backoff(attempt),
            };
            tracing::debug!(
                op = %what,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fetch()
    }
}
