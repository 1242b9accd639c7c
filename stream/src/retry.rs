use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{Operation, StoreError, UploadError};

/// Why a retried call gave up.
#[derive(Debug)]
pub enum RetryError {
    /// Every attempt failed with a retryable error; holds the last one
    Exhausted { attempts: u32, last: StoreError },
    /// Failed with an error that is not worth retrying
    NonRetryable(StoreError),
}

impl RetryError {
    pub fn into_upload_error(self, operation: Operation) -> UploadError {
        match self {
            RetryError::Exhausted { attempts, last } => UploadError::Transient {
                operation,
                attempts,
                source: last,
            },
            RetryError::NonRetryable(source) => UploadError::Permanent { operation, source },
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
    /// Maximum jitter to add to backoff delay (as fraction of delay, e.g., 0.25 = ±25%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryConfig {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }
}

/// Run `func` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` attempts have been made.
pub async fn with_retry<F, Fut, T>(
    operation: Operation,
    config: &RetryConfig,
    mut func: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match func().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() => {
                if attempt >= max_attempts {
                    log::warn!("{} gave up after {} attempts: {}", operation, attempt, err);
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay = backoff_with_jitter(attempt - 1, config);
                log::warn!(
                    "{} failed ({}), retry attempt {}/{} after {:?}",
                    operation,
                    err,
                    attempt + 1,
                    max_attempts,
                    delay
                );
                sleep(delay).await;
            }
            Err(err) => return Err(RetryError::NonRetryable(err)),
        }
    }
}

/// Calculate backoff delay with jitter for a given attempt.
///
/// Uses exponential backoff: base_delay * 2^attempt, capped at max_delay.
/// Adds random jitter of ±jitter_factor.
fn backoff_with_jitter(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let max_ms = config.max_delay.as_millis() as u64;
    let delay_ms = base_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(max_ms);
    let jitter_range = (delay_ms as f64 * config.jitter_factor) as u64;
    if jitter_range == 0 {
        return Duration::from_millis(delay_ms);
    }
    let jitter = rand::rng().random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
    Duration::from_millis((delay_ms as i64 + jitter).max(0) as u64)
}
