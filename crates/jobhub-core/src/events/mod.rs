//! Events emitted when a job's circuit breaker changes state.
//!
//! Consumers (dashboards, alerting, the admin CLI's watch mode) receive
//! these through a [`TransitionNotifier`](crate::traits::TransitionNotifier).
//! Delivery is fire-and-forget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CircuitBreakerId, JobId};

/// The kind of breaker transition that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Closed → Open, or a manual open.
    Opened,
    /// Open → HalfOpen after the open duration elapsed.
    HalfOpened,
    /// HalfOpen → Closed, or a manual close.
    Closed,
    /// HalfOpen → Open after trial runs failed to recover the job.
    Reopened,
}

impl TransitionKind {
    /// Name used on notification channels.
    pub fn notification_name(&self) -> &'static str {
        match self {
            Self::Opened => "CircuitBreakerOpened",
            Self::HalfOpened => "CircuitBreakerHalfOpened",
            Self::Closed => "CircuitBreakerClosed",
            Self::Reopened => "CircuitBreakerReopened",
        }
    }
}

/// A single breaker transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    pub kind: TransitionKind,
    pub job_id: JobId,
    pub job_name: String,
    pub breaker_id: CircuitBreakerId,
    /// Open reason for Opened/Reopened, override note for manual transitions.
    pub reason: Option<String>,
    pub consecutive_failures: i32,
    pub half_open_attempts: i32,
    /// Who caused the transition (`CircuitBreakerMonitor` or an operator).
    pub actor: String,
}

impl TransitionEvent {
    /// Create a transition event stamped with `timestamp`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TransitionKind,
        job_id: JobId,
        job_name: impl Into<String>,
        breaker_id: CircuitBreakerId,
        reason: Option<String>,
        consecutive_failures: i32,
        half_open_attempts: i32,
        actor: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            kind,
            job_id,
            job_name: job_name.into(),
            breaker_id,
            reason,
            consecutive_failures,
            half_open_attempts,
            actor: actor.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_names() {
        assert_eq!(TransitionKind::Opened.notification_name(), "CircuitBreakerOpened");
        assert_eq!(TransitionKind::Reopened.notification_name(), "CircuitBreakerReopened");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&TransitionKind::HalfOpened).expect("serialize");
        assert_eq!(json, "\"half_opened\"");
    }
}
