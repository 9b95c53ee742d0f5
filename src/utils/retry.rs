use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use super::shutdown::wait_for_shutdown;

// ============================================================================
// Bounded Retry with Backoff
// ============================================================================
//
// Used for broker connection establishment (fixed 5 x 5s by default) and for
// best-effort side publishes such as dead letters. The delay is only slept
// *between* attempts: N attempts wait N-1 times. A permanent error ends the
// loop at once.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied after every failed attempt (1.0 = fixed)
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Few quick retries for operations nobody waits on.
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed on every attempt; carries the last error
    Failed(E),
    /// Shutdown was requested while waiting between attempts
    Cancelled,
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Execute an operation with backoff between attempts.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let (_keep_open, mut never) = watch::channel(false);
    retry_until_shutdown(config, &mut never, operation).await
}

/// Like `retry_with_backoff`, but a shutdown signal aborts the wait.
pub async fn retry_until_shutdown<F, Fut, T, E>(
    config: &RetryConfig,
    shutdown: &mut watch::Receiver<bool>,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if !error.is_transient() {
                    tracing::error!(attempt = attempt, error = %error, "Permanent failure, not retrying");
                    return RetryResult::Failed(error);
                }
                if attempt >= config.max_attempts {
                    tracing::error!(
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    return RetryResult::Failed(error);
                }

                let delay = config.delay_after(attempt);
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying after delay"
                );

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = wait_for_shutdown(shutdown) => {
                        tracing::info!(attempt = attempt, "Retry loop cancelled by shutdown");
                        return RetryResult::Cancelled;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Temporary,
        Fatal,
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl IsTransient for Failure {
        fn is_transient(&self) -> bool {
            *self == Failure::Temporary
        }
    }

    #[test]
    fn test_fixed_delay_never_grows() {
        let config = RetryConfig::fixed(5, Duration::from_secs(5));
        for attempt in 1..=5 {
            assert_eq!(config.delay_after(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(config.delay_after(1), Duration::from_millis(100));
        assert_eq!(config.delay_after(2), Duration::from_millis(200));
        assert_eq!(config.delay_after(3), Duration::from_millis(400));
        assert_eq!(config.delay_after(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::fixed(3, Duration::from_millis(10));

        let result = retry_with_backoff(&config, |_attempt| {
            let counter = counter.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(Failure::Temporary)
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Success("success")));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_waits_between_attempts_only() {
        let config = RetryConfig::fixed(5, Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        let mut seen = Vec::new();

        let result = retry_with_backoff(&config, |attempt| {
            seen.push(attempt);
            async { Err::<(), _>(Failure::Temporary) }
        })
        .await;

        assert!(matches!(result, RetryResult::Failed(Failure::Temporary)));
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_wait() {
        let config = RetryConfig::fixed(5, Duration::from_secs(5));
        let (tx, mut rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            retry_until_shutdown(&config, &mut rx, |_| async { Err::<(), _>(Failure::Temporary) }).await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        assert!(matches!(handle.await.unwrap(), RetryResult::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_immediately() {
        let config = RetryConfig::fixed(5, Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        let mut seen = Vec::new();

        let result = retry_with_backoff(&config, |attempt| {
            seen.push(attempt);
            async { Err::<(), _>(Failure::Fatal) }
        })
        .await;

        assert!(matches!(result, RetryResult::Failed(Failure::Fatal)));
        assert_eq!(seen, vec![1]);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
