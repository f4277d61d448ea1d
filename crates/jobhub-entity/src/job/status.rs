//! Job lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a job definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created but never activated; not scheduled.
    Draft,
    /// Scheduled and dispatched normally.
    Active,
    /// Suspended by an operator or by an open circuit breaker.
    Disabled,
    /// Retired; kept for history only.
    Archived,
}

impl JobStatus {
    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
