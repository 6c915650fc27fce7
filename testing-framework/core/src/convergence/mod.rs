pub mod balance;
pub mod epoch;

use std::{fmt, future::Future, time::Duration};

pub use balance::{await_balance_at_least, await_nonzero_balance, query_balance};
pub use epoch::{await_epoch_after, capture_epoch};
use testing_framework_config::RetryConfig;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

use crate::scenario::DynError;

/// Attempt budget and spacing for a polling loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Enough attempts at `interval` to cover `timeout`.
    #[must_use]
    pub fn covering(timeout: Duration, interval: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            u32::try_from(timeout.as_millis().div_ceil(interval.as_millis()))
                .unwrap_or(u32::MAX)
                .max(1)
        };
        Self { attempts, interval }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.attempts, config.wait())
    }
}

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("{expectation}: not met after {attempts} attempt(s){}", observed_suffix(.observed))]
    Exhausted {
        expectation: String,
        attempts: u32,
        observed: Option<String>,
        #[source]
        source: Option<DynError>,
    },
    #[error("{expectation}: not met within {waited:?}{}", observed_suffix(.observed))]
    TimedOut {
        expectation: String,
        waited: Duration,
        observed: Option<String>,
    },
}

fn observed_suffix(observed: &Option<String>) -> String {
    observed
        .as_ref()
        .map(|value| format!(" (last observed {value})"))
        .unwrap_or_default()
}

/// Failure of a polling loop, carrying the last value the query produced.
#[derive(Debug)]
pub struct Unmet<T> {
    pub last: Option<T>,
    pub error: ConditionError,
}

impl<T> fmt::Display for Unmet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<T: fmt::Debug> std::error::Error for Unmet<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

impl<T> From<Unmet<T>> for ConditionError {
    fn from(unmet: Unmet<T>) -> Self {
        unmet.error
    }
}

/// Polls `query` until `predicate` holds or the attempt budget is spent.
///
/// A failing query consumes an attempt. The loop never sleeps after the final
/// attempt and never calls `query` more than `policy.attempts` times.
pub async fn await_condition<T, Q, Fut, P>(
    expectation: impl Into<String>,
    policy: RetryPolicy,
    mut query: Q,
    mut predicate: P,
) -> Result<T, Unmet<T>>
where
    T: fmt::Debug,
    Q: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DynError>>,
    P: FnMut(&T) -> bool,
{
    let expectation = expectation.into();
    let mut last = None;
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        match query().await {
            Ok(value) if predicate(&value) => {
                debug!(expectation = %expectation, attempt, "condition met");
                return Ok(value);
            }
            Ok(value) => {
                debug!(expectation = %expectation, attempt, observed = ?value, "condition not met yet");
                last = Some(value);
            }
            Err(err) => {
                debug!(expectation = %expectation, attempt, %err, "condition query failed");
                last_error = Some(err);
            }
        }

        if attempt < policy.attempts && !policy.interval.is_zero() {
            sleep(policy.interval).await;
        }
    }

    Err(Unmet {
        error: ConditionError::Exhausted {
            expectation,
            attempts: policy.attempts,
            observed: last.as_ref().map(|value| format!("{value:?}")),
            source: last_error,
        },
        last,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    const FAST: RetryPolicy = RetryPolicy::new(5, Duration::ZERO);

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = await_condition(
            "value available",
            FAST,
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call <= 3 {
                        Err::<u32, DynError>("node unavailable".into())
                    } else {
                        Ok(call)
                    }
                }
            },
            |_| true,
        )
        .await
        .expect("met on fourth call");

        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stops_after_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let unmet = await_condition(
            "value above ten",
            FAST,
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<u32, DynError>(call) }
            },
            |value| *value > 10,
        )
        .await
        .expect_err("never met");

        assert_eq!(calls.load(Ordering::SeqCst), FAST.attempts);
        assert_eq!(unmet.last, Some(4));
        assert!(unmet.to_string().contains("value above ten"));
        assert!(unmet.to_string().contains("last observed 4"));
    }

    #[tokio::test]
    async fn exhausted_query_errors_keep_the_last_error() {
        let unmet = await_condition(
            "balance readable",
            RetryPolicy::new(2, Duration::ZERO),
            || async { Err::<u32, DynError>("timeout".into()) },
            |_| true,
        )
        .await
        .expect_err("always failing");

        assert!(unmet.last.is_none());
        let ConditionError::Exhausted { source, .. } = unmet.error else {
            panic!("expected exhaustion");
        };
        assert_eq!(source.map(|e| e.to_string()).as_deref(), Some("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_attempts_only() {
        let started = tokio::time::Instant::now();
        let _ = await_condition(
            "never",
            RetryPolicy::new(3, Duration::from_secs(2)),
            || async { Ok::<u32, DynError>(0) },
            |_| false,
        )
        .await;

        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn covering_policy_rounds_up() {
        let policy = RetryPolicy::covering(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(policy.attempts, 3);
        assert_eq!(
            RetryPolicy::covering(Duration::from_secs(5), Duration::ZERO).attempts,
            1
        );
    }
}
