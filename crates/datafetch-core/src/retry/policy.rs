use std::time::Duration;

use crate::config::AutoRetryConfig;
use crate::error::TransferErrorKind;

use super::classify::is_retryable;

/// Decision returned by the auto-retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the task Failed.
    NoRetry,
    /// Re-admit after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff for automatic re-admission of failed tasks.
///
/// Consumes the same `retries_used`/`max_retries` budget as a manual `start`.
#[derive(Debug, Clone, Copy)]
pub struct AutoRetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for AutoRetryPolicy {
    fn default() -> Self {
        Self::from_config(&AutoRetryConfig::default())
    }
}

impl AutoRetryPolicy {
    pub fn from_config(cfg: &AutoRetryConfig) -> Self {
        Self {
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }

    /// `retries_used` is the count before this re-admission.
    pub fn decide(
        &self,
        retries_used: i64,
        max_retries: i64,
        kind: TransferErrorKind,
    ) -> RetryDecision {
        if retries_used >= max_retries || !is_retryable(kind) {
            return RetryDecision::NoRetry;
        }
        // base * 2^retries_used, capped.
        let shift = retries_used.clamp(0, 8) as u32;
        let raw = self.base_delay.saturating_mul(1u32 << shift);
        RetryDecision::RetryAfter(raw.min(self.max_delay))
    }
}
