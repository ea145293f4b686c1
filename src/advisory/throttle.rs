//! Minimum spacing between generative provider calls

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Owned throttle watermark.
///
/// The lock is held across the wait and the watermark update, so two
/// callers can never both observe a stale watermark and proceed together.
/// Share one instance (behind an `Arc`) across everything that talks to
/// the same provider account.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call is allowed, then record it. Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let mut last_call = self.last_call.lock().await;

        let mut waited = Duration::ZERO;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                debug!(wait_ms = waited.as_millis() as u64, "Throttling provider call");
                sleep(waited).await;
            }
        }

        *last_call = Some(Instant::now());
        waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_wait_for_remainder() {
        let limiter = RateLimiter::new(Duration::from_millis(1000));
        let start = Instant::now();

        limiter.acquire().await;
        sleep(Duration::from_millis(300)).await;
        let waited = limiter.acquire().await;

        assert_eq!(waited, Duration::from_millis(700));
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_once_interval_has_passed() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.acquire().await;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(1000)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        assert!(stamps[1] - stamps[0] >= Duration::from_millis(1000));
        assert!(stamps[2] - stamps[1] >= Duration::from_millis(1000));
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }
}
