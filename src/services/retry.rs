//! Retry with exponential backoff
//!
//! The vector store adapter never retries; transient failures are retried
//! here, one level up, by the indexer and memory services. Policy per the
//! error-handling design: base 1 s, factor 2, 30 s cap, 3 attempts.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::domain::error::Result;

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// First delay
    pub base: Duration,
    /// Multiplier per attempt
    pub factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Total attempts (including the first)
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `op`, retrying transient failures per `policy`. Non-transient
/// errors surface immediately; the last transient error surfaces unchanged
/// once the attempt budget is spent.
pub async fn with_backoff<T, F, Fut>(policy: BackoffPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1),
            ..BackoffPolicy::default()
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(quick_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::transient("flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(quick_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::not_found("unit")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(quick_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::transient("always down")) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
