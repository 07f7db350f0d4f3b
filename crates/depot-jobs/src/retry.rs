//! Retry policy for failed jobs.

use crate::config::QueueConfig;
use crate::job::MAX_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling on a single backoff delay (one year).
const DELAY_CEILING_SECS: u64 = 365 * 24 * 60 * 60;

/// Decides whether a failed job goes back to `pending` and how long it waits.
///
/// The delay after a failure is `base_delay * multiplier^attempts`, where
/// `attempts` counts claims made so far. Defaults give 120s after the first
/// attempt and 240s after the second; the third failure is final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Claims allowed before the job fails permanently.
    pub max_attempts: u32,

    /// Base delay in seconds.
    pub base_delay_secs: u64,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Upper bound on a single delay, in seconds.
    pub max_delay_secs: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay_secs: 60,
            multiplier: 2.0,
            max_delay_secs: None,
        }
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_secs: config.backoff_base_secs,
            multiplier: config.backoff_multiplier,
            max_delay_secs: config.backoff_max_secs,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_secs = delay.as_secs();
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_secs = Some(delay.as_secs());
        self
    }

    /// Returns true if a job with `attempts` claims behind it may run again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next claim for a job that has been claimed `attempts` times.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let exp = i32::try_from(attempts).unwrap_or(i32::MAX);
        let raw = self.base_delay_secs as f64 * self.multiplier.max(1.0).powi(exp);

        let ceiling = self
            .max_delay_secs
            .unwrap_or(DELAY_CEILING_SECS)
            .min(DELAY_CEILING_SECS);

        if raw.is_finite() && raw < ceiling as f64 {
            Duration::from_secs(raw as u64)
        } else {
            Duration::from_secs(ceiling)
        }
    }
}
