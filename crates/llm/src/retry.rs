//! Generic retry with exponential backoff and jitter.
//!
//! This wrapper is orthogonal to the orchestrator's per-call provider
//! fallback: it retries the *entire* operation (all providers), which
//! covers transient whole-system issues like a brief network blip.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry attempts beyond the initial one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Multiplicative jitter: each delay is scaled by a uniform factor
    /// in [0.5, 1.0].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5_000),
            multiplier: 1.5,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Errors that can be classified as retryable (transient) or not.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
    fn error_type(&self) -> String;
    fn error_message(&self) -> String;
}

/// Run `operation` until it succeeds, a non-retryable error surfaces,
/// or retries are exhausted. Non-retryable errors (auth failures,
/// malformed requests) rethrow immediately without consuming a retry.
pub async fn execute_with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("operation recovered after {attempt} retries");
                }
                return Ok(value);
            }
            Err(error) => {
                if !error.is_retryable() || attempt >= config.max_retries {
                    if !error.is_retryable() {
                        debug!(
                            "non-retryable error ({}), giving up: {}",
                            error.error_type(),
                            error.error_message()
                        );
                    }
                    return Err(error);
                }

                let delay = backoff_delay(config, attempt);
                warn!(
                    "operation failed ({}), retry {}/{} in {delay:?}: {}",
                    error.error_type(),
                    attempt + 1,
                    config.max_retries,
                    error.error_message()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Delay before retry number `attempt + 1` (zero-based):
/// `min(initial * multiplier^attempt, max)`, jittered down by a factor
/// in [0.5, 1.0] when enabled.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponential = config.initial_delay.as_millis() as f64 * config.multiplier.powi(attempt as i32);
    let capped = exponential.min(config.max_delay.as_millis() as f64);

    let scaled = if config.jitter {
        capped * rand::thread_rng().gen_range(0.5..=1.0)
    } else {
        capped
    };
    Duration::from_millis(scaled as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }

        fn error_type(&self) -> String {
            "test".to_string()
        }

        fn error_message(&self) -> String {
            "test failure".to_string()
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false)
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(500))
            .with_multiplier(1.5)
            .with_max_delay(Duration::from_millis(5_000))
            .with_jitter(false);

        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(750));
        // Far attempts stay capped.
        assert_eq!(backoff_delay(&config, 20), Duration::from_millis(5_000));
    }

    #[test]
    fn jitter_scales_within_half_to_full() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(1_000))
            .with_jitter(true);

        for _ in 0..100 {
            let delay = backoff_delay(&config, 0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1_000));
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let result: Result<i32, TestError> =
            execute_with_retry(&fast_config(), || async { Ok(42) }).await;
        assert_eq!(result.expect("should succeed"), 42);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let config = fast_config();

        let result = execute_with_retry(&config, || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError { retryable: true })
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.expect("should recover"), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let counter = Arc::new(AtomicU32::new(0));
        let config = fast_config();

        let result: Result<i32, TestError> = execute_with_retry(&config, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { retryable: false })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let config = fast_config().with_max_retries(2);

        let result: Result<i32, TestError> = execute_with_retry(&config, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError { retryable: true })
            }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt plus two retries.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
