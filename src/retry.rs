use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff shared by every upload attempt of a file.
///
/// `max_attempts` is the whole budget (initial attempt included), so a file
/// that never succeeds ends with exactly `max_attempts` uploads behind it.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 5,
            max_delay_secs: 300,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (0-indexed).
    ///
    /// Formula: `min(base * 2^retry + jitter, max_delay)` where jitter is
    /// drawn from `0..=base * 2^retry / 10`. Keeping jitter under 10% of the
    /// exponential term means the next step (which doubles) always dominates,
    /// so the schedule never decreases.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay_secs.saturating_mul(1000);
        let exp_ms = base_ms.saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let jitter_ms = if self.jitter && exp_ms >= 10 {
            rand::thread_rng().gen_range(0..=exp_ms / 10)
        } else {
            0
        };
        let cap_ms = self.max_delay_secs.saturating_mul(1000);
        Duration::from_millis(exp_ms.saturating_add(jitter_ms).min(cap_ms))
    }

    /// Whether another attempt fits in the budget after `attempts_made`.
    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// Used for one-shot calls outside a file's lifecycle (the startup bucket
/// probe). Per-file uploads drive their retries through the lifecycle state
/// machine instead so the attempt budget is shared with verification.
///
/// Returns the first `Ok` result, or the last error if attempts are exhausted
/// or the classifier returns `Abort`.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                attempt += 1;
                if classifier(&e) == RetryAction::Abort || attempt >= total_attempts {
                    return Err(e);
                }
                let delay = config.delay_for_retry(attempt - 1);
                tracing::warn!(
                    attempt,
                    max_attempts = total_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
