//! Retry and timeout handling for connector calls.
//!
//! Only transient errors (communication faults and expired waits) are
//! retried. Everything else is returned to the caller on first occurrence.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConnectorError, ConnectorResult};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Retry executor with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Calculate delay for a given attempt (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(exponent);

        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            // Up to 25% jitter
            delay_ms * (1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Execute an operation with retries.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> ConnectorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_transient() || attempt >= self.config.max_retries {
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Await a connector call with an upper bound.
///
/// An expired wait is reported as [`ConnectorError::Timeout`], which is
/// transient. The underlying call is dropped, not interrupted on the
/// resource side.
pub async fn call_with_timeout<Fut, T>(
    operation: &str,
    timeout: Duration,
    call: Fut,
) -> ConnectorResult<T>
where
    Fut: Future<Output = ConnectorResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(operation = %operation, timeout_ms, "Connector call timed out");
            Err(ConnectorError::Timeout {
                operation: operation.to_string(),
                timeout_ms,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_executor_succeeds_first_try() {
        let executor = RetryExecutor::with_defaults();
        let call_count = AtomicUsize::new(0);

        let result = executor
            .execute(|| {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ConnectorError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_executor_retries_on_transient_error() {
        let executor = RetryExecutor::new(fast_config(3));
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let result = executor
            .execute(move || {
                let count = call_count_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(ConnectorError::communication("connection reset"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_executor_gives_up_after_max_retries() {
        let executor = RetryExecutor::new(fast_config(2));
        let call_count = AtomicUsize::new(0);

        let result: ConnectorResult<i32> = executor
            .execute(|| {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::communication("down")) }
            })
            .await;

        assert!(matches!(result, Err(ConnectorError::Communication { .. })));
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_executor_fails_on_permanent_error() {
        let executor = RetryExecutor::with_defaults();
        let call_count = AtomicUsize::new(0);

        let result: ConnectorResult<i32> = executor
            .execute(|| {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::schema("bad attribute")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_calculate_delay_exponential_backoff() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        });

        assert_eq!(executor.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(executor.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(executor.calculate_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_calculate_delay_respects_max() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
        });

        assert_eq!(executor.calculate_delay(5), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let executor = RetryExecutor::new(RetryConfig {
            jitter: true,
            ..fast_config(1)
        });
        let delay = executor.calculate_delay(0);
        assert!(delay <= Duration::from_millis(2));
    }

    #[tokio::test]
    async fn test_call_with_timeout_expires() {
        let result: ConnectorResult<()> = call_with_timeout(
            "fetch_changes",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.error_code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn test_call_with_timeout_passes_result_through() {
        let result = call_with_timeout("fetch_object", Duration::from_secs(1), async {
            Err::<(), _>(ConnectorError::not_found("uid=jack"))
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
    }
}
