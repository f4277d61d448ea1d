//! Circuit-breaker policy attached to a job.

use jobhub_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Thresholds controlling when a job's breaker opens and how it recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CircuitBreakerPolicyFields")]
pub struct CircuitBreakerPolicy {
    enabled: bool,
    failure_threshold: u32,
    consecutive_failures_window: u32,
    open_duration_seconds: u64,
    auto_recover: bool,
    half_open_max_attempts: u32,
}

#[derive(Deserialize)]
struct CircuitBreakerPolicyFields {
    enabled: bool,
    failure_threshold: u32,
    consecutive_failures_window: u32,
    open_duration_seconds: u64,
    #[serde(default = "default_true")]
    auto_recover: bool,
    #[serde(default = "default_half_open_attempts")]
    half_open_max_attempts: u32,
}

impl TryFrom<CircuitBreakerPolicyFields> for CircuitBreakerPolicy {
    type Error = AppError;

    fn try_from(f: CircuitBreakerPolicyFields) -> Result<Self, Self::Error> {
        Self::new(
            f.enabled,
            f.failure_threshold,
            f.consecutive_failures_window,
            f.open_duration_seconds,
            f.auto_recover,
            f.half_open_max_attempts,
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_half_open_attempts() -> u32 {
    3
}

impl CircuitBreakerPolicy {
    pub fn new(
        enabled: bool,
        failure_threshold: u32,
        consecutive_failures_window: u32,
        open_duration_seconds: u64,
        auto_recover: bool,
        half_open_max_attempts: u32,
    ) -> AppResult<Self> {
        if failure_threshold < 1 {
            return Err(AppError::validation("Failure threshold must be at least 1"));
        }
        if consecutive_failures_window < 1 {
            return Err(AppError::validation(
                "Consecutive failures window must be at least 1",
            ));
        }
        if open_duration_seconds < 1 {
            return Err(AppError::validation(
                "Open duration must be at least 1 second",
            ));
        }
        if half_open_max_attempts < 1 {
            return Err(AppError::validation(
                "Half-open max attempts must be at least 1",
            ));
        }
        Ok(Self {
            enabled,
            failure_threshold,
            consecutive_failures_window,
            open_duration_seconds,
            auto_recover,
            half_open_max_attempts,
        })
    }

    const fn preset(
        enabled: bool,
        failure_threshold: u32,
        consecutive_failures_window: u32,
        open_duration_seconds: u64,
        half_open_max_attempts: u32,
    ) -> Self {
        Self {
            enabled,
            failure_threshold,
            consecutive_failures_window,
            open_duration_seconds,
            auto_recover: true,
            half_open_max_attempts,
        }
    }

    /// Breaker never evaluated. Thresholds match [`Default`] so enabling it later is sane.
    pub const fn disabled() -> Self {
        Self::preset(false, 5, 10, 300, 3)
    }

    /// Trips quickly and stays open longer.
    pub const fn aggressive() -> Self {
        Self::preset(true, 3, 5, 600, 2)
    }

    /// Tolerates longer failure runs and retries recovery sooner.
    pub const fn lenient() -> Self {
        Self::preset(true, 10, 20, 180, 5)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn consecutive_failures_window(&self) -> u32 {
        self.consecutive_failures_window
    }

    pub fn open_duration_seconds(&self) -> u64 {
        self.open_duration_seconds
    }

    pub fn auto_recover(&self) -> bool {
        self.auto_recover
    }

    pub fn half_open_max_attempts(&self) -> u32 {
        self.half_open_max_attempts
    }
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self::preset(true, 5, 10, 300, 3)
    }
}
