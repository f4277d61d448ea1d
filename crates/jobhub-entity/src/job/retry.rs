//! Retry policy and backoff calculation.

use std::fmt;
use std::time::Duration;

use jobhub_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Upper bound on `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;
/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_DELAY_SECONDS: u64 = 3600;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    Linear,
    Exponential,
    ExponentialWithJitter,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Linear => "linear",
            Self::Exponential => "exponential",
            Self::ExponentialWithJitter => "exponential_with_jitter",
        };
        f.write_str(s)
    }
}

/// Source of uniform randomness for jittered backoff.
pub trait JitterSource: Send + Sync {
    /// A uniform sample in `[0.0, 1.0]`.
    fn sample(&self) -> f64;
}

/// Default jitter backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Immutable retry configuration attached to a job.
///
/// Instances are validated on construction and on deserialization, so a
/// stored policy is always within range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyFields")]
pub struct RetryPolicy {
    max_retries: u32,
    strategy: RetryStrategy,
    base_delay_seconds: u64,
    max_delay_seconds: u64,
}

#[derive(Deserialize)]
struct RetryPolicyFields {
    max_retries: u32,
    strategy: RetryStrategy,
    base_delay_seconds: u64,
    #[serde(default = "default_max_delay")]
    max_delay_seconds: u64,
}

impl TryFrom<RetryPolicyFields> for RetryPolicy {
    type Error = AppError;

    fn try_from(f: RetryPolicyFields) -> Result<Self, Self::Error> {
        Self::with_max_delay(
            f.max_retries,
            f.strategy,
            f.base_delay_seconds,
            f.max_delay_seconds,
        )
    }
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_SECONDS
}

impl RetryPolicy {
    /// Build a policy with the default delay cap of one hour.
    pub fn new(max_retries: u32, strategy: RetryStrategy, base_delay_seconds: u64) -> AppResult<Self> {
        Self::with_max_delay(
            max_retries,
            strategy,
            base_delay_seconds,
            DEFAULT_MAX_DELAY_SECONDS,
        )
    }

    /// Build a policy with an explicit delay cap.
    pub fn with_max_delay(
        max_retries: u32,
        strategy: RetryStrategy,
        base_delay_seconds: u64,
        max_delay_seconds: u64,
    ) -> AppResult<Self> {
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(AppError::validation(format!(
                "Max retries must be between 0 and {MAX_RETRIES_LIMIT}, got {max_retries}"
            )));
        }
        if strategy == RetryStrategy::None && max_retries > 0 {
            return Err(AppError::validation(format!(
                "Retry strategy 'none' allows no retries, got {max_retries}"
            )));
        }
        if strategy != RetryStrategy::None && base_delay_seconds < 1 {
            return Err(AppError::validation(
                "Base delay must be at least 1 second",
            ));
        }
        if max_delay_seconds < base_delay_seconds {
            return Err(AppError::validation(format!(
                "Max delay ({max_delay_seconds}s) must not be below base delay ({base_delay_seconds}s)"
            )));
        }
        Ok(Self {
            max_retries,
            strategy,
            base_delay_seconds,
            max_delay_seconds,
        })
    }

    /// Never retry.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            strategy: RetryStrategy::None,
            base_delay_seconds: 0,
            max_delay_seconds: DEFAULT_MAX_DELAY_SECONDS,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn strategy(&self) -> RetryStrategy {
        self.strategy
    }

    pub fn base_delay_seconds(&self) -> u64 {
        self.base_delay_seconds
    }

    pub fn max_delay_seconds(&self) -> u64 {
        self.max_delay_seconds
    }

    /// Whether another attempt is allowed after `attempt` retries so far.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Backoff before retry number `attempt` (1-based), using thread-local jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &ThreadRngJitter)
    }

    /// Backoff before retry number `attempt` (1-based) with an injected jitter source.
    pub fn delay_with(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let attempt = attempt.max(1);
        let seconds = match self.strategy {
            RetryStrategy::None => 0,
            RetryStrategy::Linear => self.base_delay_seconds.saturating_mul(u64::from(attempt)),
            RetryStrategy::Exponential => self.exponential(attempt),
            RetryStrategy::ExponentialWithJitter => {
                let factor = 0.5 + jitter.sample().clamp(0.0, 1.0) * 0.5;
                // f64 -> u64 casts saturate
                (self.exponential(attempt) as f64 * factor) as u64
            }
        };
        Duration::from_secs(seconds.min(self.max_delay_seconds))
    }

    fn exponential(&self, attempt: u32) -> u64 {
        let shift = attempt - 1;
        let multiplier = if shift >= u64::BITS - 1 {
            u64::MAX
        } else {
            1u64 << shift
        };
        self.base_delay_seconds.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    /// Three retries, jittered exponential backoff from 30s capped at 5 minutes.
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: RetryStrategy::ExponentialWithJitter,
            base_delay_seconds: 30,
            max_delay_seconds: 300,
        }
    }
}
