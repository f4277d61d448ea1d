//! Circuit breaker entity and state machine.

use chrono::{DateTime, Utc};
use jobhub_core::types::{CircuitBreakerId, JobId};
use jobhub_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::state::CircuitBreakerState;
use crate::job::CircuitBreakerPolicy;

/// The breaker belonging to one job.
///
/// Closed → Open → HalfOpen → Closed, with HalfOpen → Open when trial runs
/// keep failing. `consecutive_failures` is a cache of the monitor's last
/// window scan, not an independent counter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobCircuitBreaker {
    pub id: CircuitBreakerId,
    pub job_id: JobId,
    pub state: CircuitBreakerState,
    pub consecutive_failures: i32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_state_change_at: DateTime<Utc>,
    pub half_open_attempts: i32,
    pub open_reason: Option<String>,
    pub opened_by: Option<String>,
}

impl JobCircuitBreaker {
    /// A closed breaker for `job_id`.
    pub fn new(job_id: JobId, now: DateTime<Utc>) -> Self {
        Self {
            id: CircuitBreakerId::new(),
            job_id,
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            last_state_change_at: now,
            half_open_attempts: 0,
            open_reason: None,
            opened_by: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == CircuitBreakerState::Closed
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitBreakerState::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.state == CircuitBreakerState::HalfOpen
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
    }

    /// Reset the failure run. A half-open breaker closes.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_failure_at = None;
        if self.is_half_open() {
            self.close(now);
        }
    }

    /// Overwrite the cached failure run with a freshly counted value.
    pub fn sync_failure_count(&mut self, count: i32, last_failure_at: Option<DateTime<Utc>>) {
        self.consecutive_failures = count;
        self.last_failure_at = if count == 0 { None } else { last_failure_at };
    }

    /// Open the breaker. Returns `false` when it was already open.
    pub fn open(&mut self, reason: &str, opened_by: &str, now: DateTime<Utc>) -> bool {
        if self.is_open() {
            return false;
        }
        self.state = CircuitBreakerState::Open;
        self.opened_at = Some(now);
        self.open_reason = Some(reason.to_string());
        self.opened_by = Some(opened_by.to_string());
        self.last_state_change_at = now;
        self.half_open_attempts = 0;
        true
    }

    /// Open → HalfOpen.
    pub fn move_to_half_open(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if !self.is_open() {
            return Err(AppError::invalid_transition(format!(
                "Can only move to half-open from open, breaker for job {} is {}",
                self.job_id, self.state
            )));
        }
        self.state = CircuitBreakerState::HalfOpen;
        self.last_state_change_at = now;
        self.half_open_attempts = 0;
        Ok(())
    }

    /// Close from any state, clearing all failure and open bookkeeping.
    pub fn close(&mut self, now: DateTime<Utc>) {
        self.state = CircuitBreakerState::Closed;
        self.consecutive_failures = 0;
        self.last_failure_at = None;
        self.opened_at = None;
        self.open_reason = None;
        self.opened_by = None;
        self.last_state_change_at = now;
        self.half_open_attempts = 0;
    }

    pub fn increment_half_open_attempts(&mut self) -> AppResult<()> {
        if !self.is_half_open() {
            return Err(AppError::invalid_transition(format!(
                "Can only count trial runs while half-open, breaker for job {} is {}",
                self.job_id, self.state
            )));
        }
        self.half_open_attempts = self.half_open_attempts.saturating_add(1);
        Ok(())
    }

    /// Open, auto-recovering, and open for at least the policy's duration.
    pub fn should_transition_to_half_open(&self, policy: &CircuitBreakerPolicy, now: DateTime<Utc>) -> bool {
        if !self.is_open() || !policy.auto_recover() {
            return false;
        }
        let Some(opened_at) = self.opened_at else {
            return false;
        };
        let elapsed = (now - opened_at).num_seconds();
        elapsed >= 0 && elapsed as u64 >= policy.open_duration_seconds()
    }

    pub fn has_exceeded_half_open_attempts(&self, max_attempts: u32) -> bool {
        self.is_half_open() && i64::from(self.half_open_attempts) >= i64::from(max_attempts)
    }
}
