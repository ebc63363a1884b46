//! Fixed-delay retry
//!
//! Used for session establishment: the scoring service is retried a fixed
//! number of times with a constant pause between attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Attempt budget and inter-attempt delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (0 is treated as 1)
    pub max_attempts: u32,
    /// Pause between two consecutive attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            fscore_common::config::DEFAULT_MAX_LOGIN_ATTEMPTS,
            Duration::from_secs(fscore_common::config::DEFAULT_LOGIN_RETRY_DELAY_SECS),
        )
    }
}

/// Every attempt failed
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `operation` until it succeeds or the policy's attempts are used up
///
/// `operation` receives the 1-based attempt number. Every error is retried;
/// there is no delay after the final failure.
pub async fn retry_fixed<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Operation failed: retry budget exhausted"
                    );
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, will retry after delay"
                );

                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
}
