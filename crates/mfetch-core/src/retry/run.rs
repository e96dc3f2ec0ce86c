//! Async retry loop that stops early on cancellation.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{FailureClass, RetryDecision, RetryPolicy};

/// Errors the retry loop can classify and synthesize on cancellation.
pub trait Retryable: std::fmt::Display {
    fn class(&self) -> FailureClass;
    fn cancelled() -> Self;
}

/// Runs `op` until it succeeds, fails permanently, exhausts the policy, or
/// `token` is cancelled. `op` receives the 1-based attempt number.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    op: F,
) -> Result<T, E>
where
    E: Retryable,
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        if token.is_cancelled() {
            return Err(E::cancelled());
        }
        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        match policy.decide(attempt, err.class()) {
            RetryDecision::NoRetry => return Err(err),
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    attempt,
                    max = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(E::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
