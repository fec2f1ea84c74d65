//! Bounded exponential backoff for read-only ledger calls.
//!
//! Only transport failures are retried. Rejections and validation errors
//! come back on the first attempt. Money-moving calls never go through
//! here.

use std::future::Future;

use casegate_types::{CasegateError, ErrorKind, Result, RetryPolicy};

/// Run `op` until it succeeds, fails with a non-transport error, or the
/// policy's attempt cap is reached.
///
/// # Errors
/// - the first non-transport error, unchanged
/// - [`CasegateError::RetriesExhausted`] once every attempt failed at the
///   transport layer
pub async fn retry_read<T, F, Fut>(policy: &RetryPolicy, what: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() != ErrorKind::Transport => return Err(err),
            Err(err) if attempt >= attempts => {
                tracing::warn!(what, attempts, error = %err, "Read retries exhausted");
                return Err(CasegateError::RetriesExhausted {
                    attempts,
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    what,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying read"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
