//! Bounded retry around store calls.

use aware_env::StoreError;
use std::future::Future;
use tracing::warn;

use crate::config::RetryPolicy;

/// Runs `call` until it succeeds, fails permanently, or the budget is spent.
///
/// Each attempt is capped by `policy.timeout()`; a timed-out attempt counts
/// as a transient `StoreError::Timeout`. Only transient errors are retried,
/// with a fixed pause between attempts, so the worst-case latency is
/// `max_attempts * (timeout + backoff)`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.timeout(), call()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(policy.timeout_ms)),
        };

        match outcome {
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!("{} failed (attempt {}/{}): {}", what, attempt, attempts, e);
                if !policy.backoff().is_zero() {
                    tokio::time::sleep(policy.backoff()).await;
                }
            }
            other => return other,
        }
    }
}
