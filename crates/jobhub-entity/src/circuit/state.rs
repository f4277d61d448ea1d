//! Circuit breaker states.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "circuit_breaker_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// Normal operation.
    Closed,
    /// Job suspended after a failure run.
    Open,
    /// Probing whether the job has recovered.
    HalfOpen,
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
