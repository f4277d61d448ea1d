//! Execution status enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "execution_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Waiting for an instance to pick it up.
    Queued,
    /// Handed to the job handler.
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    Skipped,
    /// Failed or timed out; waiting for `next_retry_at`.
    Retrying,
}

impl ExecutionStatus {
    /// Statuses that count toward a job's concurrency ceiling.
    pub const ACTIVE: [Self; 2] = [Self::Queued, Self::Running];

    /// The attempt has finished one way or another.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled | Self::Skipped
        )
    }

    /// Outcomes that feed retry and circuit-breaker logic.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    /// Return the status as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
