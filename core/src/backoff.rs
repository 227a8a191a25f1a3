//! Reusable retry / polling policy
//!
//! The same policy type drives both the connection retry and the wait for an
//! in-flight connection attempt, so attempt counts and delays are configured
//! in one place.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt budget and delay schedule
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Growth factor applied per attempt (1.0 = constant)
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Fixed delay between attempts
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Run `operation` until it succeeds, the error is not retryable, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn retry<F, Fut, T, E, R>(
        &self,
        mut operation: F,
        is_retryable: R,
        operation_name: &str,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(operation = operation_name, attempt, error = %e, "Final attempt failed");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Poll `check` until it yields a value or the attempt budget is spent
    pub async fn poll<F, Fut, T>(&self, mut check: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(value) = check().await {
                return Some(value);
            }
            if attempt < attempts {
                sleep(self.delay_for(attempt)).await;
            }
        }
        None
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_schedule() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(4), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retry_stops_on_non_retryable() {
        let policy = BackoffPolicy::constant(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .retry(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal".to_string()) }
                },
                |_| false,
                "test",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let policy = BackoffPolicy::constant(2, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .retry(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("transient".to_string()) }
                },
                |_| true,
                "test",
            )
            .await;

        assert_eq!(result.unwrap_err(), "transient");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_poll_returns_first_value() {
        let policy = BackoffPolicy::constant(10, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let value = policy
            .poll(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { (n == 3).then_some(n) }
            })
            .await;

        assert_eq!(value, Some(3));
    }

    #[tokio::test]
    async fn test_poll_gives_up() {
        let policy = BackoffPolicy::constant(4, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let value: Option<()> = policy
            .poll(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { None }
            })
            .await;

        assert!(value.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
