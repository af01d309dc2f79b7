//! Bounded retry with exponential backoff for warehouse reads.
//!
//! RULE: only transient source failures are retried.
//! Everything else (bad SQL, bad parameters, integrity findings) fails on
//! the first attempt. A source that never recovers surfaces as
//! `SourceUnavailable`, never as an empty result.

use crate::error::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay_ms:   u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Maximum delay between attempts, regardless of backoff.
    pub max_delay_ms:       u64,
    /// Total attempts including the first one.
    pub max_attempts:       u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms:   200,
            backoff_multiplier: 2.0,
            max_delay_ms:       5_000,
            max_attempts:       4,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping. Used by tests that inject failures.
    pub const NO_RETRY: RetryPolicy = RetryPolicy {
        initial_delay_ms:   0,
        backoff_multiplier: 1.0,
        max_delay_ms:       0,
        max_attempts:       1,
    };

    /// Delay to wait after the `retry_count`-th failure (0-based).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }
        let backoff = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry_count as i32);
        let backoff_ms = backoff.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
    pub fn run<T>(&self, op_name: &str, mut op: impl FnMut() -> MetricsResult<T>) -> MetricsResult<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    log::error!("{op_name}: giving up after {attempt} attempt(s): {e}");
                    return Err(MetricsError::SourceUnavailable {
                        attempts: attempt,
                        reason:   e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt - 1);
                    log::warn!(
                        "{op_name}: attempt {attempt}/{max_attempts} failed ({e}); retrying in {}ms",
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn unavailable() -> MetricsError {
        MetricsError::SourceUnavailable { attempts: 1, reason: "connection refused".into() }
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            initial_delay_ms:   100,
            backoff_multiplier: 2.0,
            max_delay_ms:       300,
            max_attempts:       5,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(6), Duration::from_millis(300));
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let policy = RetryPolicy { max_attempts: 3, ..RetryPolicy::NO_RETRY };
        let calls = Cell::new(0);
        let out = policy.run("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(unavailable()) } else { Ok(7) }
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_budget_reports_attempt_count() {
        let policy = RetryPolicy { max_attempts: 2, ..RetryPolicy::NO_RETRY };
        let err = policy.run::<()>("test", || Err(unavailable())).unwrap_err();
        assert!(matches!(err, MetricsError::SourceUnavailable { attempts: 2, .. }));
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let policy = RetryPolicy { max_attempts: 5, ..RetryPolicy::NO_RETRY };
        let calls = Cell::new(0);
        let err = policy
            .run::<()>("test", || {
                calls.set(calls.get() + 1);
                Err(MetricsError::UnknownTimeBucket("hour".into()))
            })
            .unwrap_err();
        assert!(matches!(err, MetricsError::UnknownTimeBucket(_)));
        assert_eq!(calls.get(), 1);
    }
}
