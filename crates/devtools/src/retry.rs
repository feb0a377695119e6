//! Retry / Timeout Executor
//!
//! Two small primitives used by the connection manager and the correlator:
//! - `retry`: run a fallible async operation up to N times with a pause between attempts
//! - `with_timeout`: race a future against a deadline, yielding a distinct timeout outcome

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;

/// Deadline elapsed before the operation settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut(pub Duration);

/// Run `op` until it succeeds or the policy runs out of attempts.
///
/// `op` receives the 1-based attempt number. The last failure is returned on exhaustion.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                tracing::warn!("Giving up after {} attempt(s): {}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Attempt {}/{} failed: {}", attempt, attempts, e);
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Race `fut` against `deadline`.
///
/// Exactly one outcome is produced. If the timer wins, the future is dropped
/// and anything it would have produced later is discarded with it.
pub async fn with_timeout<T, E, Fut>(deadline: Duration, fut: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<TimedOut>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(TimedOut(deadline).into()),
    }
}
