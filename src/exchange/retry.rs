use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::logging::log_retry;

/// Retry configuration
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 4_000,
            max_delay_ms: 10_000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff clamped to `[base_delay_ms, max_delay_ms]`, with
    /// optional jitter that never leaves that window.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (clamped + jitter)
            .max(self.base_delay_ms as f64)
            .min(self.max_delay_ms.max(self.base_delay_ms) as f64);

        Duration::from_millis(final_delay as u64)
    }
}

/// Retry a fallible async operation with exponential backoff. Errors for
/// which `is_retryable` returns false are surfaced immediately.
pub async fn retry_async<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation_name: &str,
    is_retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                let delay = config.delay_for_attempt(attempt - 1);
                log_retry(
                    operation_name,
                    attempt,
                    max_attempts,
                    delay.as_millis() as u64,
                    &e.to_string(),
                );
                sleep(delay).await;
            }
        }
    }
}

/// Categorize errors for retry decisions
pub fn is_retryable_http_error(status: u16) -> bool {
    matches!(status,
        408 |   // Request Timeout
        429 |   // Too Many Requests
        500 |   // Internal Server Error
        502 |   // Bad Gateway
        503 |   // Service Unavailable
        504     // Gateway Timeout
    )
}

/// Categorize network errors
pub fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(4_000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(8_000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(10_000)); // clamped
    }

    #[test]
    fn jitter_stays_inside_window() {
        let config = RetryConfig {
            jitter_factor: 0.5,
            ..Default::default()
        };
        for attempt in 0..5 {
            let d = config.delay_for_attempt(attempt);
            assert!(d >= Duration::from_millis(4_000));
            assert!(d <= Duration::from_millis(10_000));
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_try() {
        let config = RetryConfig::default();
        let result: Result<i32, String> =
            retry_async(&config, "test", |_| true, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_eventual_success() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32, String> = retry_async(&config, "test", |_| true, || {
            let c = counter_clone.clone();
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<(), String> = retry_async(&config, "test", |_| true, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            }
        })
        .await;
        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_is_not_retried() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<(), String> = retry_async(&config, "test", |_| false, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("bad request".to_string())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classifies_statuses() {
        assert!(is_retryable_http_error(429));
        assert!(is_retryable_http_error(503));
        assert!(!is_retryable_http_error(400));
        assert!(!is_retryable_http_error(404));
    }
}
