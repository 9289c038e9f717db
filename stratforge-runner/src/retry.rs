//! Bounded retry with exponential backoff and jitter.
//!
//! The policy is a plain value injected into the runner, so retry behavior is
//! testable with counters and no clock beyond `sleep`. Classification of
//! retryable vs. fatal errors stays with the error type (the caller passes a
//! predicate); the policy only decides how many times and how long to wait.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Cap applied after exponential growth.
    pub max_delay_ms: u64,
    /// Full jitter: each delay is drawn uniformly from [0, computed delay].
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 15_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based). Exponential doubling
    /// from `base_delay_ms`, capped, then jittered.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << (retry - 1).min(20));
        let capped = exp.min(self.max_delay_ms);
        let ms = if self.jitter && capped > 0 {
            rand::thread_rng().gen_range(0..=capped)
        } else {
            capped
        };
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts are exhausted.
    /// The last error is preserved in all failure paths.
    pub fn run<T, E, F, P>(&self, mut op: F, is_transient: P) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
