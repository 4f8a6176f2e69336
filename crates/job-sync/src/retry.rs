//! Bounded exponential backoff for retryable fetch failures.

use crate::SyncError;
use job_types::FetchError;
use std::future::Future;
use std::time::Duration;

pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Retry `n` (1-based) waits `2^n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Run `op`, retrying retryable errors up to `policy.max_retries` times.
///
/// Non-retryable errors come back as [`SyncError::Fetch`] immediately; exhausting
/// the budget yields [`SyncError::RetriesExhausted`] with the last error.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() => return Err(SyncError::Fetch(e)),
            Err(e) if attempt >= policy.max_retries => {
                return Err(SyncError::RetriesExhausted {
                    retries: attempt,
                    last: e,
                })
            }
            Err(e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying job status fetch: {e}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
