//! Bounded retry with a fixed delay.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Maximum attempts and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run exactly once.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Outcome of [`run_with_retry`] together with the attempts it took.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Invoke `action` until it succeeds or `policy.max_attempts` is reached.
///
/// Attempts run sequentially and `policy.delay` elapses between a failure and
/// the next attempt. There is no delay after the final attempt. When every
/// attempt fails, the last error is returned as-is. `action` receives the
/// 1-based attempt number.
pub async fn run_with_retry<T, E, F, Fut>(policy: RetryPolicy, mut action: F) -> Retried<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max = policy.attempts();
    let mut attempt = 1;
    loop {
        match action(attempt).await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if attempt >= max => {
                return Retried {
                    result: Err(e),
                    attempts: attempt,
                }
            }
            Err(e) => {
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {}ms",
                    attempt,
                    max,
                    e,
                    policy.delay.as_millis()
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
