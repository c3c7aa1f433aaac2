//! Exponential backoff schedule for chain calls.

use std::future::Future;
use std::time::Duration;

use etrap_evidence::anchor::AnchorError;

/// Delay before retrying 0-based `attempt`: `base * factor^attempt`.
pub fn backoff_delay(attempt: u32, base: Duration, factor: u32) -> Duration {
    base.saturating_mul(factor.saturating_pow(attempt))
}

/// Run `op` up to `attempts` times, sleeping [`backoff_delay`] between
/// tries. Terminal errors short-circuit without retrying.
pub async fn with_retries<T, F, Fut>(
    attempts: u32,
    base: Duration,
    factor: u32,
    mut op: F,
) -> Result<T, AnchorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AnchorError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_terminal() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(err);
                }
                tracing::warn!(attempt, error = %err, "retrying after backoff");
                tokio::time::sleep(backoff_delay(attempt - 1, base, factor)).await;
            }
        }
    }
}
