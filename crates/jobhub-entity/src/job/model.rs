//! Job definition entity model.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jobhub_core::types::JobId;
use jobhub_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::circuit_policy::CircuitBreakerPolicy;
use super::retry::RetryPolicy;
use super::status::JobStatus;

/// A registered job: what to run, how long it may take, and how failures are handled.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobDefinition {
    pub id: JobId,
    pub name: String,
    pub description: Option<String>,
    /// Key into the executor registry.
    pub job_type: String,
    pub status: JobStatus,
    /// Deadline for one execution, in seconds.
    pub timeout_seconds: i32,
    /// Ceiling on Queued + Running executions of this job.
    pub max_concurrent_executions: i32,
    #[sqlx(json)]
    pub retry_policy: RetryPolicy,
    #[sqlx(json)]
    pub circuit_breaker_policy: CircuitBreakerPolicy,
    pub allow_manual_trigger: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
    // -- Disable bookkeeping --
    pub disabled_by: Option<String>,
    pub disabled_at: Option<DateTime<Utc>>,
    /// For breaker-disabled jobs this is the breaker's open reason.
    pub disabled_reason: Option<String>,
}

/// Data required to register a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub description: Option<String>,
    pub job_type: String,
    pub timeout_seconds: i32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: i32,
    #[serde(default = "RetryPolicy::no_retry")]
    pub retry_policy: RetryPolicy,
    #[serde(default = "CircuitBreakerPolicy::disabled")]
    pub circuit_breaker_policy: CircuitBreakerPolicy,
    #[serde(default = "default_true")]
    pub allow_manual_trigger: bool,
    pub created_by: String,
}

fn default_max_concurrent() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

impl NewJob {
    /// A job with one slot, no retries, and the breaker disabled.
    pub fn new(
        name: impl Into<String>,
        job_type: impl Into<String>,
        timeout_seconds: i32,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            job_type: job_type.into(),
            timeout_seconds,
            max_concurrent_executions: default_max_concurrent(),
            retry_policy: RetryPolicy::no_retry(),
            circuit_breaker_policy: CircuitBreakerPolicy::disabled(),
            allow_manual_trigger: true,
            created_by: created_by.into(),
        }
    }
}

impl JobDefinition {
    /// Create a job in `Draft` status.
    pub fn new(new: NewJob, now: DateTime<Utc>) -> AppResult<Self> {
        if new.name.trim().is_empty() {
            return Err(AppError::validation("Job name cannot be empty"));
        }
        if new.job_type.trim().is_empty() {
            return Err(AppError::validation("Job type cannot be empty"));
        }
        validate_timeout(new.timeout_seconds)?;
        validate_concurrency(new.max_concurrent_executions)?;

        Ok(Self {
            id: JobId::new(),
            name: new.name,
            description: new.description,
            job_type: new.job_type,
            status: JobStatus::Draft,
            timeout_seconds: new.timeout_seconds,
            max_concurrent_executions: new.max_concurrent_executions,
            retry_policy: new.retry_policy,
            circuit_breaker_policy: new.circuit_breaker_policy,
            allow_manual_trigger: new.allow_manual_trigger,
            created_by: new.created_by,
            created_at: now,
            updated_by: None,
            updated_at: now,
            disabled_by: None,
            disabled_at: None,
            disabled_reason: None,
        })
    }

    /// Per-execution deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.timeout_seconds).unwrap_or(0))
    }

    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }

    /// Make the job schedulable. No-op when already active.
    pub fn activate(&mut self, by: &str, now: DateTime<Utc>) {
        if self.status == JobStatus::Active {
            return;
        }
        self.status = JobStatus::Active;
        self.updated_by = Some(by.to_string());
        self.updated_at = now;
        self.disabled_by = None;
        self.disabled_at = None;
        self.disabled_reason = None;
    }

    /// Stop scheduling the job. No-op when already disabled.
    pub fn disable(&mut self, by: &str, reason: &str, now: DateTime<Utc>) {
        if self.status == JobStatus::Disabled {
            return;
        }
        self.status = JobStatus::Disabled;
        self.disabled_by = Some(by.to_string());
        self.disabled_at = Some(now);
        self.disabled_reason = Some(reason.to_string());
        self.updated_by = Some(by.to_string());
        self.updated_at = now;
    }

    pub fn archive(&mut self, by: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Archived;
        self.updated_by = Some(by.to_string());
        self.updated_at = now;
    }

    pub fn set_timeout(&mut self, timeout_seconds: i32) -> AppResult<()> {
        validate_timeout(timeout_seconds)?;
        self.timeout_seconds = timeout_seconds;
        Ok(())
    }

    pub fn set_concurrency(&mut self, max_concurrent: i32) -> AppResult<()> {
        validate_concurrency(max_concurrent)?;
        self.max_concurrent_executions = max_concurrent;
        Ok(())
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry_policy = policy;
    }

    pub fn set_circuit_breaker_policy(&mut self, policy: CircuitBreakerPolicy) {
        self.circuit_breaker_policy = policy;
    }
}

fn validate_timeout(timeout_seconds: i32) -> AppResult<()> {
    if timeout_seconds < 1 {
        return Err(AppError::validation("Timeout must be at least 1 second"));
    }
    Ok(())
}

fn validate_concurrency(max_concurrent: i32) -> AppResult<()> {
    if max_concurrent < 1 {
        return Err(AppError::validation(
            "Max concurrent executions must be at least 1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobDefinition {
        JobDefinition::new(NewJob::new("nightly-export", "export", 60, "tests"), Utc::now())
            .expect("valid job")
    }

    #[test]
    fn test_new_job_is_draft() {
        let job = job();
        assert_eq!(job.status, JobStatus::Draft);
        assert_eq!(job.max_concurrent_executions, 1);
        assert_eq!(job.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_bad_limits() {
        let mut new = NewJob::new("x", "export", 0, "tests");
        assert!(JobDefinition::new(new.clone(), Utc::now()).is_err());
        new.timeout_seconds = 10;
        new.max_concurrent_executions = 0;
        assert!(JobDefinition::new(new, Utc::now()).is_err());
    }

    #[test]
    fn test_disable_records_reason_and_is_idempotent() {
        let mut job = job();
        let first = Utc::now();
        job.activate("ops", first);
        job.disable("CircuitBreakerMonitor", "too many failures", first);
        let later = first + chrono::Duration::minutes(5);
        job.disable("someone-else", "other", later);

        assert_eq!(job.status, JobStatus::Disabled);
        assert_eq!(job.disabled_by.as_deref(), Some("CircuitBreakerMonitor"));
        assert_eq!(job.disabled_reason.as_deref(), Some("too many failures"));
        assert_eq!(job.disabled_at, Some(first));
    }

    #[test]
    fn test_activate_clears_disable_fields() {
        let mut job = job();
        let now = Utc::now();
        job.disable("ops", "maintenance", now);
        job.activate("ops", now);
        assert!(job.is_active());
        assert!(job.disabled_reason.is_none());
        assert!(job.disabled_at.is_none());
    }
}
