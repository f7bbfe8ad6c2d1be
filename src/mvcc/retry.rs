//! Bounded retry of conflicting backend transactions.
//!
//! Every mutation reads and writes the shared revision counter, so concurrent
//! writers serialize through the backend's conflict detection. A conflicting
//! attempt is retried with exponential backoff plus jitter; once the attempt
//! budget is spent the operation fails with `Unavailable`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::error::{EtkvError, EtkvResult};

/// Retry budget for one engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub base_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff_ms: 10,
            max_backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Run `attempt` until it succeeds, fails with a non-retriable error, or
    /// the budget runs out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> EtkvResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EtkvResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff_ms = self.base_backoff_ms;
        let mut tries = 0;

        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && tries < max_attempts => {
                    // ThreadRng is not Send; draw before the await.
                    let jitter = rand::rng().random_range(0..backoff_ms / 2 + 1);
                    let sleep_ms = backoff_ms + jitter;
                    tracing::debug!(
                        operation,
                        attempt = tries,
                        backoff_ms = sleep_ms,
                        error = %err,
                        "transaction conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                    backoff_ms = (backoff_ms.max(1) * 2).min(self.max_backoff_ms);
                }
                Err(err) if err.is_retriable() => {
                    tracing::warn!(operation, attempts = tries, error = %err, "retries exhausted");
                    return Err(EtkvError::unavailable(format!(
                        "{} did not commit after {} attempts",
                        operation, tries
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
