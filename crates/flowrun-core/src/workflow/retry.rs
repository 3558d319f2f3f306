//! Retry policy for step execution.
//!
//! A step's effective policy is its own `retry` block with unset fields
//! filled from the engine defaults. Backoff is exponential and capped, with
//! no jitter so delays are predictable in tests and logs.

use std::time::Duration;

use flowrun_types::config::EngineConfig;
use flowrun_types::error::StepErrorKind;
use flowrun_types::workflow::StepSpec;

/// Fully resolved retry and timeout policy for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always >= 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Per-attempt deadline.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::resolve(None, &EngineConfig::default())
    }
}

impl RetryPolicy {
    /// Merge a step's overrides over the engine defaults.
    pub fn resolve(step: Option<&StepSpec>, config: &EngineConfig) -> Self {
        let retry = step.and_then(|s| s.retry.as_ref());
        let max_attempts = retry
            .and_then(|r| r.max_attempts)
            .unwrap_or(config.default_max_attempts)
            .max(1);
        let initial_backoff_ms = retry
            .and_then(|r| r.initial_backoff_ms)
            .unwrap_or(config.default_initial_backoff_ms);
        let max_backoff_ms = retry
            .and_then(|r| r.max_backoff_ms)
            .unwrap_or(config.default_max_backoff_ms)
            .max(initial_backoff_ms);
        let multiplier = retry
            .and_then(|r| r.multiplier)
            .unwrap_or(config.default_backoff_multiplier);
        let timeout_secs = step
            .and_then(|s| s.timeout_secs)
            .unwrap_or(config.default_step_timeout_secs);

        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
            multiplier: if multiplier.is_finite() && multiplier >= 1.0 {
                multiplier
            } else {
                1.0
            },
            attempt_timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// Whether another attempt may follow failed attempt number `attempt` (1-based).
    pub fn should_retry(&self, kind: StepErrorKind, attempt: u32) -> bool {
        kind.is_retryable() && attempt < self.max_attempts
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    ///
    /// `initial * multiplier^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
