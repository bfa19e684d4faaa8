//! Bounded retry for external calls
//!
//! Generation providers never retry on their own; call sites that want retries wrap
//! the call here. Every error is retried until `max_attempts` is reached.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Run `operation` up to `max_attempts` times (at least once)
///
/// Waits `backoff` between attempts, doubling each time. Returns the last error
/// once attempts are exhausted.
pub async fn retry_attempts<F, Fut, T, E>(
    operation_name: &str,
    max_attempts: u32,
    backoff: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if attempt >= max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Giving up after final attempt"
                );
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, will retry"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                delay = delay.saturating_mul(2);
            }
        }
    }
}
