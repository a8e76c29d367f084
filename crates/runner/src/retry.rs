// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry policy: exponential backoff with jitter, restricted to
//! transient error kinds.

use mill_core::JobError;
use rand::Rng;
use std::time::{Duration, Instant};

/// Backoff is capped so a long retry chain never sleeps unbounded.
pub const MAX_BACKOFF_SEC: f64 = 10.0;
const BACKOFF_FACTOR: f64 = 1.6;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    /// Base backoff in seconds for the first retry.
    pub backoff_sec: f64,
    /// Uniform jitter fraction; clamped to [0, 0.9] when applied.
    pub jitter: f64,
    /// Absolute deadline in seconds across all attempts, measured from
    /// the first submission. `None` means no deadline.
    pub deadline_sec: Option<f64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff_sec: 0.75,
            jitter: 0.3,
            deadline_sec: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(retries: u32) -> Self {
        Self { retries, ..Self::default() }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1).max(1)
    }

    /// Exponential base delay in seconds for the 1-based attempt that just
    /// failed, before jitter.
    pub fn base_delay_sec(&self, attempt: u32) -> f64 {
        let exp = attempt.saturating_sub(1).min(64) as i32;
        (self.backoff_sec * BACKOFF_FACTOR.powi(exp)).min(MAX_BACKOFF_SEC)
    }

    /// Base delay with jitter applied, floored at zero.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_sec(attempt);
        let jitter = if self.jitter <= 0.0 { 0.0 } else { self.jitter.min(0.9) };
        let factor = if jitter == 0.0 {
            1.0
        } else {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        };
        Duration::try_from_secs_f64((base * factor).max(0.0)).unwrap_or_default()
    }

    /// Whether the attempt that just failed may be retried.
    pub fn should_retry(&self, error: &JobError, attempt: u32, started: Instant) -> bool {
        if !error.is_retryable() || attempt >= self.max_attempts() {
            return false;
        }
        match self.deadline_sec {
            Some(deadline) => started.elapsed().as_secs_f64() < deadline,
            None => true,
        }
    }

    /// Progress fraction reported alongside a retry announcement.
    pub fn retry_progress(&self, attempt: u32) -> f64 {
        (f64::from(attempt.saturating_sub(1)) / f64::from(self.max_attempts())).clamp(0.0, 0.95)
    }
}

/// Submission options shared by both runners.
#[derive(Debug, Clone, Default)]
pub struct SubmitOpts {
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
}

impl SubmitOpts {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { retry: RetryPolicy::default(), timeout: Some(timeout) }
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self { retry, timeout: None }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
