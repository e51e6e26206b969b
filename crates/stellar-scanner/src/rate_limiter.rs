//! Rate limiter: token-bucket gate for outbound probes, shared by the port
//! scanner and the POC engine.
//!
//! Quota burst equals the refill rate, so a caller can spend a full second's
//! budget in a burst rather than trickling it out one token at a time.
//! `acquire` takes a `CancellationToken` so a canceled wait surfaces as
//! `Error::RateLimit` instead of blocking forever.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use stellar_core::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Token-bucket rate limiter shared by the Port Scanner and the POC Engine.
///
/// `max_rate = None` disables gating entirely (the config layer maps
/// `rate_limit: 0` to `None`).
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    max_rate: Option<u32>,
}

impl RateLimiter {
    /// Create a new rate limiter with refill rate `max_rate` per second and
    /// burst equal to `max_rate`.
    pub fn new(max_rate: Option<u32>) -> Self {
        let limiter = max_rate.and_then(|rate| {
            NonZeroU32::new(rate).map(|nz_rate| {
                let quota = Quota::per_second(nz_rate).allow_burst(nz_rate);
                Arc::new(GovernorRateLimiter::direct(quota))
            })
        });

        Self { limiter, max_rate }
    }

    /// Wait until a token is available, or until `cancel` fires.
    ///
    /// Returns `Error::RateLimit` if the wait is canceled mid-flight, so a
    /// canceled probe is skipped rather than completed late.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(ref limiter) = self.limiter else {
            return Ok(());
        };

        trace!("acquiring rate limit token (max: {:?} pps)", self.max_rate);

        tokio::select! {
            _ = limiter.until_ready() => Ok(()),
            _ = cancel.cancelled() => Err(Error::RateLimit("wait canceled".to_string())),
        }
    }

    /// Try to acquire a token without waiting.
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Configured refill rate, or `None` if unlimited.
    pub fn max_rate(&self) -> Option<u32> {
        self.max_rate
    }

    /// Whether rate limiting is active.
    pub fn is_limited(&self) -> bool {
        self.max_rate.is_some()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_rate", &self.max_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::time::Duration;

    #[tokio::test]
    async fn test_no_rate_limit_is_instant() {
        let limiter = RateLimiter::new(None);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(!limiter.is_limited());
    }

    #[tokio::test]
    async fn test_rate_limit_enforced() {
        let limiter = RateLimiter::new(Some(10));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..20 {
            limiter.acquire(&cancel).await.unwrap();
        }
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(800));
        assert_eq!(limiter.max_rate(), Some(10));
    }

    #[tokio::test]
    async fn test_burst_equals_rate() {
        // B=R means the first R acquisitions should not block at all.
        let limiter = RateLimiter::new(Some(10));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_cancellation_surfaces_as_rate_limit_error() {
        let limiter = RateLimiter::new(Some(1));
        let cancel = CancellationToken::new();

        // Exhaust the single-token burst, then cancel mid-wait.
        limiter.acquire(&cancel).await.unwrap();
        let limiter2 = limiter.clone();
        let cancel2 = cancel.clone();
        let waiter = tokio::spawn(async move { limiter2.acquire(&cancel2).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::RateLimit(_))));
    }

    #[test]
    fn test_try_acquire_unlimited() {
        let limiter = RateLimiter::new(None);
        for _ in 0..100 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn test_try_acquire_exhausts_burst() {
        let limiter = RateLimiter::new(Some(10));
        let mut succeeded = 0;
        for _ in 0..100 {
            if limiter.try_acquire() {
                succeeded += 1;
            }
        }
        assert!(succeeded < 100);
    }

    #[test]
    fn test_clone_preserves_rate() {
        let limiter1 = RateLimiter::new(Some(100));
        let limiter2 = limiter1.clone();
        assert_eq!(limiter1.max_rate(), limiter2.max_rate());
    }
}
