//! 🔄 Retry: try again, a bit later, a bounded number of times.
//!
//! Wraps any `FnMut() -> Future<Output = Result<T, JobError>>`. Duplicates never get
//! this far (they are a success outcome). Transient errors earn another attempt until
//! `max_attempts` is spent; anything else is returned after the first try.
//! Delays double from `base_delay_ms` and stop growing at `max_delay_ms`.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::jobs::JobError;

/// ⏳ How hard to try.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 🔢 Total attempts including the first. Zero is treated as one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// ⏱️ Wait before attempt `attempt + 1`, given `attempt` (1-based) just failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// 💀 Out of attempts, or never worth a second one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: JobError },
    #[error("not retried: {0}")]
    NotRetryable(JobError),
}

/// 🔁 Run `op` until it succeeds or the policy runs out.
pub async fn run<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, JobError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => {
                error!(job = label, attempt, error = %err, "💀 job failed, not retrying");
                return Err(RetryError::NotRetryable(err));
            }
            Err(last) if attempt >= max_attempts => {
                error!(job = label, attempts = attempt, error = %last, "💀 job failed, retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                warn!(job = label, attempt, ?delay, error = %err, "🔄 job failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn an_impatient_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn the_one_where_the_third_time_is_the_charm() {
        let the_attempts = AtomicU32::new(0);
        let counter = &the_attempts;
        let the_result = run(&an_impatient_policy(), "charm", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(JobError::Transient(format!("nope #{n}")))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(the_result, Ok(42));
        assert_eq!(the_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn the_one_where_three_strikes_means_out() {
        let the_attempts = AtomicU32::new(0);
        let counter = &the_attempts;
        let the_result: Result<usize, _> = run(&an_impatient_policy(), "doomed", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(JobError::Transient("still down".to_string()))
        })
        .await;
        assert_eq!(
            the_result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: JobError::Transient("still down".to_string())
            })
        );
        assert_eq!(the_attempts.load(Ordering::SeqCst), 3, "no fourth attempt");
    }

    #[tokio::test]
    async fn the_one_where_a_hopeless_error_gets_exactly_one_shot() {
        let the_attempts = AtomicU32::new(0);
        let counter = &the_attempts;
        let the_today = chrono::NaiveDate::MIN;
        let the_result: Result<usize, _> = run(&an_impatient_policy(), "calendar", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(JobError::DayOutOfRange {
                today: the_today,
                offset: 1,
            })
        })
        .await;
        assert_eq!(
            the_result,
            Err(RetryError::NotRetryable(JobError::DayOutOfRange {
                today: the_today,
                offset: 1
            }))
        );
        assert_eq!(the_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_one_where_success_needs_no_second_chance() {
        let the_attempts = AtomicU32::new(0);
        let counter = &the_attempts;
        let the_result = run(&an_impatient_policy(), "easy", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, JobError>("done")
        })
        .await;
        assert_eq!(the_result, Ok("done"));
        assert_eq!(the_attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn the_one_where_backoff_doubles_then_hits_the_ceiling() {
        let the_policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 500,
            max_delay_ms: 3_000,
        };
        assert_eq!(the_policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(the_policy.delay_after(2), Duration::from_millis(1_000));
        assert_eq!(the_policy.delay_after(3), Duration::from_millis(2_000));
        assert_eq!(the_policy.delay_after(4), Duration::from_millis(3_000));
        assert_eq!(the_policy.delay_after(64), Duration::from_millis(3_000));
    }
}
