//! Retry policy for transport calls

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default wait between transport retries
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay every attempt
    Fixed,
    /// Delay multiplied by `factor` each attempt, capped at `max`
    Exponential { factor: f64, max: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// `None` retries until cancelled
    pub max_attempts: Option<u32>,
    pub interval: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::indefinite(DEFAULT_RETRY_INTERVAL)
    }
}

impl RetryPolicy {
    pub fn indefinite(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            interval,
            backoff: Backoff::Fixed,
        }
    }

    pub fn limited(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            interval,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max } => {
                let exponent = retry.saturating_sub(1).min(32) as i32;
                let scaled = self.interval.as_secs_f64() * factor.max(1.0).powi(exponent);
                Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
            }
        }
    }

    /// Whether attempt number `attempt` (1-based) may run
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Run `call` until it succeeds, attempts run out, or `cancel` fires
    ///
    /// On exhaustion or cancellation the last error is returned.
    pub async fn retry<T, E, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !self.allows(attempt + 1) || cancel.is_cancelled() => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transport call failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::indefinite(Duration::from_secs(1)).with_backoff(Backoff::Exponential {
            factor: 2.0,
            max: Duration::from_secs(5),
        });

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(60), Duration::from_secs(5));
    }

    #[test]
    fn test_attempt_limits() {
        assert!(RetryPolicy::indefinite(Duration::ZERO).allows(u32::MAX));
        let limited = RetryPolicy::limited(3, Duration::ZERO);
        assert!(limited.allows(3));
        assert!(!limited.allows(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::indefinite(Duration::from_secs(5));

        let value = policy
            .retry("receive", &CancellationToken::new(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err("connection refused")
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limited_policy_returns_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::limited(2, Duration::from_secs(1));

        let err = policy
            .retry("publish", &CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("down")
            })
            .await
            .unwrap_err();

        assert_eq!(err, "down");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = RetryPolicy::default()
            .retry("receive", &cancel, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("down")
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
