// src/provider/retry.rs — Bounded retry with exponential backoff for oracle calls
//
// Retries: rate limits, retriable provider errors (5xx, connection resets), timeouts.
// Does NOT retry: auth errors, bad requests, store errors, cancellation.

use std::future::Future;
use std::time::Duration;

use crate::infra::config::RetrySection;
use crate::infra::errors::CadLoopError;

/// Default retry configuration.
const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY_MS: u64 = 2_000;
const BACKOFF_FACTOR: f64 = 2.0;
const MAX_DELAY_MS: u64 = 30_000;
const JITTER_FRACTION: f64 = 0.2;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            backoff_factor: BACKOFF_FACTOR,
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            jitter_fraction: JITTER_FRACTION,
        }
    }
}

impl From<&RetrySection> for RetryConfig {
    fn from(cfg: &RetrySection) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            backoff_factor: cfg.backoff_factor,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter_fraction: cfg.jitter_fraction,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32, rate_limit_delay: Option<Duration>) -> Duration {
        // If the server told us how long to wait, use that (with a small buffer).
        if let Some(rl_delay) = rate_limit_delay {
            return rl_delay + Duration::from_millis(100);
        }

        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jitter = deterministic_jitter(attempt, self.jitter_fraction);
        let final_ms = (capped_ms * jitter).max(1.0);

        Duration::from_millis(final_ms as u64)
    }
}

/// Returned when an operation could not be completed within the retry budget.
#[derive(Debug)]
pub struct RetryExhausted {
    /// Number of calls actually made.
    pub attempts: u32,
    pub last_error: CadLoopError,
}

/// Determine if an error should be retried.
fn should_retry(error: &CadLoopError) -> bool {
    error.is_retriable()
}

/// Extract rate-limit retry delay from the error, if available.
fn rate_limit_delay(error: &CadLoopError) -> Option<Duration> {
    match error {
        CadLoopError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Deterministic jitter for a given attempt to keep retries reproducible in tests.
/// Returns a multiplier in [1 - fraction, 1 + fraction].
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// retry budget is spent. `op` receives the 0-based call index.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    step: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CadLoopError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !should_retry(&e) || attempt >= config.max_retries {
                    return Err(RetryExhausted {
                        attempts: attempt + 1,
                        last_error: e,
                    });
                }

                let delay = config.delay_for_attempt(attempt, rate_limit_delay(&e));
                tracing::warn!(
                    step,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after error: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
