//! Classified Retry Executor
//!
//! Category-driven retry loop used by the job driver around every fallible
//! stage call.
//!
//! ## Strategy
//!
//! 1. Run the operation
//! 2. On failure, classify the error into the four-category taxonomy
//! 3. Transient: exponential backoff with random jitter, capped
//! 4. Quality: small fixed backoff, fewer attempts
//! 5. UserAction / Fatal: surface immediately, never retry

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::constants::retry as retry_constants;
use crate::types::{DraftError, Result};

/// Execute an operation with category-appropriate retries.
///
/// The closure is re-invoked for each attempt; attempts beyond the
/// category's budget surface the last error unchanged.
pub async fn with_retries<T, F, Fut>(operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    let mut delay = Duration::from_millis(retry_constants::TRANSIENT_BASE_DELAY_MS);

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                let category = err.category();
                let budget = category.max_retries();

                if !category.is_retryable() || attempt > budget {
                    if attempt > 1 {
                        warn!(
                            operation,
                            attempt,
                            category = %category,
                            error = %err,
                            "Giving up after retries"
                        );
                    }
                    return Err(err);
                }

                let wait = if category.backoff_is_exponential() {
                    let jittered = delay + random_jitter(delay);
                    delay = next_backoff(delay);
                    jittered
                } else {
                    category.base_backoff()
                };

                warn!(
                    operation,
                    attempt,
                    category = %category,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                sleep(wait).await;
            }
        }
    }
}

/// Surface a terminal error with its static user message attached to logs
pub fn report_terminal(operation: &str, err: &DraftError) {
    warn!(
        operation,
        category = %err.category(),
        user_message = err.user_message(),
        error = %err,
        "Terminal failure"
    );
}

/// Random jitter up to a quarter of the base delay
fn random_jitter(base_delay: Duration) -> Duration {
    let max_jitter_ms = (base_delay.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    let jitter_ms = rand::rng().random_range(0..max_jitter_ms);
    Duration::from_millis(jitter_ms)
}

/// Exponential backoff with cap
fn next_backoff(current: Duration) -> Duration {
    let next = Duration::from_secs_f32(current.as_secs_f32() * retry_constants::BACKOFF_FACTOR);
    std::cmp::min(next, Duration::from_secs(retry_constants::MAX_DELAY_SECS))
}
