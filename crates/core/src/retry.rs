//! Error classes and per-class retry policy for stage invocations.
//!
//! Attempts are counted per error class and include the first invocation:
//! a rule with `max_attempts = 2` allows one retry after the first failure of
//! that class. The delay before retry `k` is
//! `initial_delay * backoff_rate^(k-1)`, optionally clamped to `max_delay`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Malformed input or unsupported format. Never retried.
    Validation,
    /// Capacity exhaustion or execution-environment fault.
    TransientInfrastructure,
    /// The worker crashed, returned failure or timed out.
    TaskExecution,
}

impl ErrorClass {
    /// Name recorded in a failed job's `error_message`.
    pub fn name(self) -> &'static str {
        match self {
            ErrorClass::Validation => "ValidationError",
            ErrorClass::TransientInfrastructure => "TransientInfrastructureError",
            ErrorClass::TaskExecution => "TaskExecutionError",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Retry budget and backoff for one error class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryRule {
    /// Total invocations allowed for this class, first attempt included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Factor by which the delay grows after each retry.
    pub backoff_rate: f64,
    /// Optional upper bound on any single delay.
    pub max_delay: Option<Duration>,
}

impl RetryRule {
    /// A rule that never retries.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_rate: 1.0,
            max_delay: None,
        }
    }

    /// Backoff before retry number `retry` (1-based).
    ///
    /// Rates below 1.0 are treated as 1.0 so the sequence never decreases.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let rate = self.backoff_rate.max(1.0);
        let secs = self.initial_delay.as_secs_f64() * rate.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// What to do after a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Invoke the stage again after `delay`.
    Retry { delay: Duration },
    /// Budget exhausted (or class not retryable): go to the failure branch.
    GiveUp,
}

/// Per-class retry policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub transient: RetryRule,
    pub task_execution: RetryRule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient: RetryRule {
                max_attempts: 5,
                initial_delay: Duration::from_secs(60),
                backoff_rate: 2.0,
                max_delay: None,
            },
            task_execution: RetryRule {
                max_attempts: 2,
                initial_delay: Duration::from_secs(30),
                backoff_rate: 2.0,
                max_delay: None,
            },
        }
    }
}

impl RetryPolicy {
    pub fn rule_for(&self, class: ErrorClass) -> RetryRule {
        match class {
            ErrorClass::Validation => RetryRule::no_retry(),
            ErrorClass::TransientInfrastructure => self.transient,
            ErrorClass::TaskExecution => self.task_execution,
        }
    }

    /// Decide after the `failures`-th failure (1-based) of `class` on a stage.
    pub fn decide(&self, class: ErrorClass, failures: u32) -> RetryDecision {
        let rule = self.rule_for(class);
        if failures < rule.max_attempts {
            RetryDecision::Retry {
                delay: rule.delay_for_retry(failures),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
