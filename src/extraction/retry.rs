use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::config::RetryPolicy;
use crate::error::CollaboratorError;

/// Runs `call`, retrying only rate-limited failures with exponential backoff
/// plus jitter. Every other error is returned on first sight.
pub async fn with_rate_limit_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 0_usize;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() => {
                let will_retry = attempt <= policy.rate_limit_retries;
                if !will_retry {
                    error!(
                        operation,
                        attempt,
                        max_retries = policy.rate_limit_retries,
                        will_retry,
                        error = %err,
                        "llm_rate_limited"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt) + jitter(policy.jitter_ms);
                warn!(
                    operation,
                    attempt,
                    max_retries = policy.rate_limit_retries,
                    will_retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "llm_rate_limited"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!(operation, attempt, error = %err, "llm_request_failed");
                return Err(err);
            }
        }
    }
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}
