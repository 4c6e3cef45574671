//! Retry policy with exponential backoff
//!
//! Used around embedding calls. Similarity search failures are retried at
//! the stage level by the orchestrator instead.
//!
//! Defaults:
//! - Max retries: 2 (3 attempts total)
//! - Base delay: 100ms, doubled per retry
//! - Optional ±25% jitter

use crate::errors::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base delay in milliseconds
const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Default delay cap in milliseconds
const DEFAULT_MAX_DELAY_MS: u64 = 2000;

/// Retry policy with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,

    /// Delay cap in milliseconds
    pub max_delay_ms: u64,

    /// Enable jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Execute operation, retrying transient failures
    pub async fn execute<F, Fut, T>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_transient() || retries >= self.max_retries {
                        return Err(e);
                    }

                    let delay = self.delay_for(retries);
                    retries += 1;
                    tracing::debug!(
                        operation = label,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient failure"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Delay before retry number `retry` (0-based)
    fn delay_for(&self, retry: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry));
        let delay_ms = exponential.min(self.max_delay_ms);

        let final_delay = if self.jitter {
            let jitter = (delay_ms / 4) as i64;
            let random_jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter as f64;
            ((delay_ms as i64) + random_jitter as i64).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Upper bound on total sleep time, ignoring jitter
    pub fn max_total_wait_time(&self) -> Duration {
        let total_ms: u64 = (0..self.max_retries)
            .map(|retry| {
                self.base_delay_ms
                    .saturating_mul(2u64.saturating_pow(retry))
                    .min(self.max_delay_ms)
            })
            .sum();

        Duration::from_millis(total_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_delay_ms < self.base_delay_ms {
            return Err(SearchError::Config(
                "retry max_delay_ms must be at least base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let attempts = Arc::new(Mutex::new(0));
        let count = attempts.clone();

        let result = fast_policy(2)
            .execute("embed", move || {
                let count = count.clone();
                async move {
                    *count.lock().unwrap() += 1;
                    Ok::<i32, SearchError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let attempts = Arc::new(Mutex::new(0));
        let count = attempts.clone();

        let result = fast_policy(2)
            .execute("embed", move || {
                let count = count.clone();
                async move {
                    let mut guard = count.lock().unwrap();
                    *guard += 1;
                    let current = *guard;
                    drop(guard);

                    if current < 3 {
                        Err(SearchError::Embedding("connection reset".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let attempts = Arc::new(Mutex::new(0));
        let count = attempts.clone();

        let result = fast_policy(2)
            .execute("search", move || {
                let count = count.clone();
                async move {
                    *count.lock().unwrap() += 1;
                    Err::<i32, _>(SearchError::Search("unavailable".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(SearchError::Search(_))));
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let attempts = Arc::new(Mutex::new(0));
        let count = attempts.clone();

        let result = fast_policy(2)
            .execute("embed", move || {
                let count = count.clone();
                async move {
                    *count.lock().unwrap() += 1;
                    Err::<i32, _>(SearchError::Config("bad model".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    #[test]
    fn test_no_retry_policy_runs_once() {
        let attempts = Arc::new(Mutex::new(0));
        let count = attempts.clone();

        let result = tokio_test::block_on(RetryPolicy::none().execute("embed", move || {
            let count = count.clone();
            async move {
                *count.lock().unwrap() += 1;
                Err::<i32, _>(SearchError::Embedding("timeout".to_string()))
            }
        }));

        tokio_test::assert_err!(result);
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_cap() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(20), Duration::from_millis(DEFAULT_MAX_DELAY_MS));
    }

    #[test]
    fn test_max_total_wait_time() {
        assert_eq!(
            RetryPolicy::default().max_total_wait_time(),
            Duration::from_millis(300)
        );
        assert_eq!(RetryPolicy::none().max_total_wait_time(), Duration::ZERO);
    }
}
