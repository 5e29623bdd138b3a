//! Retry utilities for request/response calls.
//!
//! Only bounded, short-lived calls (session creation) go through here. The
//! event feed is never retried: a dropped feed is surfaced to the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Policy controlling retry attempts and exponential backoff behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first attempt.
    pub max_attempts: usize,
    /// Delay used before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for exponential backoff delay growth.
    pub max_backoff: Duration,
    /// Jitter as a fraction of the computed delay (0.1 = up to ±10%).
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Three attempts with a 250ms doubling backoff capped at 2s.
    pub fn session_request() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
            jitter_factor: 0.1,
        }
    }

    /// A policy that performs exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Computes the delay before the retry that follows `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = delay.saturating_mul(2).min(self.max_backoff);
        }
        apply_jitter(delay.min(self.max_backoff.max(self.initial_backoff)), self.jitter_factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::session_request()
    }
}

/// Executes an async operation, retrying errors accepted by `should_retry`.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    E: Display,
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && should_retry(&error) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    event = "retry_attempt_failed",
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

fn apply_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if delay.is_zero() || !jitter_factor.is_finite() || jitter_factor <= 0.0 {
        return delay;
    }

    let base_millis = delay.as_millis() as f64;
    let range = base_millis * jitter_factor.min(1.0);
    let jitter: f64 = rand::rng().random_range(-range..=range);
    Duration::from_millis((base_millis + jitter).max(0.0) as u64)
}
