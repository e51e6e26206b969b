//! Retry with exponential backoff for transient storage failures.
//!
//! One profile ("normal": 3 attempts, 100ms initial delay, 5s cap) covers
//! what the result handler's at-least-once storage retries need.

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::normal()
    }
}

impl RetryConfig {
    /// Balanced retry profile for storage operations: 3 attempts, 100ms
    /// initial delay, 5s cap.
    pub fn normal() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry a fallible async operation with exponential backoff.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    mut operation: F,
    config: RetryConfig,
    is_retriable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("operation succeeded after {} attempts", attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                let should_retry = attempt < config.max_attempts && is_retriable(&e);

                if !should_retry {
                    if attempt >= config.max_attempts {
                        debug!("max retry attempts ({}) exceeded", config.max_attempts);
                    } else {
                        debug!("error not retriable, giving up after attempt {}", attempt);
                    }
                    return Err(e);
                }

                debug!(
                    "attempt {}/{} failed: {}. retrying in {:?}...",
                    attempt, config.max_attempts, e, delay
                );

                if delay.as_millis() > 0 {
                    let actual_delay = if config.jitter { add_jitter(delay) } else { delay };
                    sleep(actual_delay).await;
                }

                delay = std::cmp::min(
                    Duration::from_secs_f64(delay.as_secs_f64() * config.multiplier),
                    config.max_delay,
                );
            }
        }
    }
}

/// Add random jitter to delay (±25%) to avoid thundering herd on retry storms.
fn add_jitter(delay: Duration) -> Duration {
    use rand::Rng;
    let jitter_factor = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let result = retry_with_backoff(|| async { Ok::<_, String>(42) }, RetryConfig::default(), |_| true).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_success_on_second_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let count = attempts.fetch_add(1, Ordering::SeqCst);
                    if count == 0 {
                        Err("first attempt fails")
                    } else {
                        Ok(42)
                    }
                }
            },
            RetryConfig::default(),
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_max_attempts_exceeded() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("always fails")
                }
            },
            RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                multiplier: 2.0,
                jitter: false,
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_non_retriable_error_stops_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("non-retriable")
                }
            },
            RetryConfig::default(),
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_config_normal() {
        let config = RetryConfig::normal();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config, RetryConfig::default());
    }

    #[test]
    fn test_add_jitter_range() {
        let delay = Duration::from_secs(1);
        for _ in 0..50 {
            let jittered = add_jitter(delay);
            assert!(jittered >= Duration::from_millis(750));
            assert!(jittered <= Duration::from_millis(1250));
        }
    }
}
