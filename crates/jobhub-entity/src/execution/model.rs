//! Job execution entity and lifecycle transitions.

use chrono::{DateTime, Utc};
use jobhub_core::types::{ExecutionId, JobId, ScheduleId};
use jobhub_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::ExecutionStatus;

/// One attempt to run a job.
///
/// Executions are append-only history: they change status but are never
/// deleted. Every transition takes the current time explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobExecution {
    pub id: ExecutionId,
    pub job_id: JobId,
    /// `None` for manual triggers.
    pub schedule_id: Option<ScheduleId>,
    pub status: ExecutionStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub retry_attempt: i32,
    pub max_retry_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Backoff applied by the most recent retry.
    pub retry_delay_seconds: Option<i64>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub triggered_by: Option<String>,
    pub is_manual: bool,
    /// Scheduler instance that created or last ran the execution.
    pub host_instance: Option<String>,
}

impl JobExecution {
    /// A queued execution created by a schedule firing.
    pub fn scheduled(
        job_id: JobId,
        schedule_id: ScheduleId,
        max_retry_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self::queued(job_id, Some(schedule_id), max_retry_attempts, now)
    }

    /// A queued execution requested by an operator.
    pub fn manual(
        job_id: JobId,
        triggered_by: &str,
        input: Option<serde_json::Value>,
        max_retry_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut execution = Self::queued(job_id, None, max_retry_attempts, now);
        execution.triggered_by = Some(triggered_by.to_string());
        execution.is_manual = true;
        execution.input = input;
        execution
    }

    fn queued(
        job_id: JobId,
        schedule_id: Option<ScheduleId>,
        max_retry_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            job_id,
            schedule_id,
            status: ExecutionStatus::Queued,
            queued_at: now,
            started_at: None,
            completed_at: None,
            duration_seconds: 0,
            retry_attempt: 0,
            max_retry_attempts: i32::try_from(max_retry_attempts).unwrap_or(i32::MAX),
            next_retry_at: None,
            retry_delay_seconds: None,
            input: None,
            output: None,
            error_message: None,
            stack_trace: None,
            triggered_by: None,
            is_manual: false,
            host_instance: None,
        }
    }

    /// Record which scheduler instance is handling the execution.
    pub fn on_host(mut self, host: &str) -> Self {
        self.host_instance = Some(host.to_string());
        self
    }

    /// Queued/Retrying → Running.
    pub fn start(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.require(&[ExecutionStatus::Queued, ExecutionStatus::Retrying], "start")?;
        self.status = ExecutionStatus::Running;
        self.started_at = Some(now);
        self.completed_at = None;
        self.next_retry_at = None;
        Ok(())
    }

    /// Running → Succeeded.
    pub fn complete(&mut self, output: Option<serde_json::Value>, now: DateTime<Utc>) -> AppResult<()> {
        self.require(&[ExecutionStatus::Running], "complete")?;
        self.status = ExecutionStatus::Succeeded;
        self.output = output;
        self.finish(now);
        Ok(())
    }

    /// Running → Failed.
    pub fn fail(&mut self, message: &str, stack_trace: Option<String>, now: DateTime<Utc>) -> AppResult<()> {
        self.require(&[ExecutionStatus::Running], "fail")?;
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(message.to_string());
        self.stack_trace = stack_trace;
        self.finish(now);
        Ok(())
    }

    /// Running → TimedOut.
    pub fn timeout(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.require(&[ExecutionStatus::Running], "time out")?;
        self.status = ExecutionStatus::TimedOut;
        self.error_message = Some("Execution timed out".to_string());
        self.stack_trace = None;
        self.finish(now);
        Ok(())
    }

    /// Any non-terminal status → Cancelled.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> AppResult<()> {
        self.require(Self::NON_TERMINAL, "cancel")?;
        self.status = ExecutionStatus::Cancelled;
        self.error_message = Some(format!("Cancelled: {reason}"));
        self.next_retry_at = None;
        self.finish(now);
        Ok(())
    }

    /// Any non-terminal status → Skipped.
    pub fn skip(&mut self, reason: &str, now: DateTime<Utc>) -> AppResult<()> {
        self.require(Self::NON_TERMINAL, "skip")?;
        self.status = ExecutionStatus::Skipped;
        self.error_message = Some(format!("Skipped: {reason}"));
        self.next_retry_at = None;
        self.finish(now);
        Ok(())
    }

    /// Failed/TimedOut → Retrying, consuming one retry.
    pub fn schedule_retry(&mut self, next_retry_at: DateTime<Utc>, delay_seconds: i64) -> AppResult<()> {
        if !self.can_retry() {
            return Err(AppError::invalid_transition(format!(
                "Execution {} cannot be retried (status {}, attempt {}/{})",
                self.id, self.status, self.retry_attempt, self.max_retry_attempts
            )));
        }
        self.retry_attempt += 1;
        self.status = ExecutionStatus::Retrying;
        self.next_retry_at = Some(next_retry_at);
        self.retry_delay_seconds = Some(delay_seconds);
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.retry_attempt < self.max_retry_attempts && self.status.is_failure()
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    const NON_TERMINAL: &'static [ExecutionStatus] = &[
        ExecutionStatus::Queued,
        ExecutionStatus::Running,
        ExecutionStatus::Retrying,
    ];

    fn require(&self, allowed: &[ExecutionStatus], action: &str) -> AppResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(AppError::invalid_transition(format!(
                "Cannot {action} execution {} in status {}",
                self.id, self.status
            )))
        }
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        self.duration_seconds = self
            .started_at
            .map(|started| (now - started).num_seconds().max(0))
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn running(max_retries: u32) -> (JobExecution, DateTime<Utc>) {
        let now = Utc::now();
        let mut e = JobExecution::scheduled(JobId::new(), ScheduleId::new(), max_retries, now);
        e.start(now).expect("queued execution starts");
        (e, now)
    }

    #[test]
    fn test_complete_records_duration() {
        let (mut e, start) = running(0);
        e.complete(Some(serde_json::json!({"rows": 3})), start + Duration::seconds(42))
            .expect("running execution completes");
        assert_eq!(e.status, ExecutionStatus::Succeeded);
        assert_eq!(e.duration_seconds, 42);
        assert!(e.is_completed());
        assert!(e.started_at <= e.completed_at);
    }

    #[test]
    fn test_skip_before_start_has_zero_duration() {
        let now = Utc::now();
        let mut e = JobExecution::manual(JobId::new(), "ops", None, 0, now);
        e.skip("job disabled", now + Duration::seconds(30)).expect("queued execution skips");
        assert_eq!(e.duration_seconds, 0);
        assert_eq!(e.error_message.as_deref(), Some("Skipped: job disabled"));
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let now = Utc::now();
        let mut e = JobExecution::manual(JobId::new(), "ops", None, 0, now);
        let err = e.complete(None, now).expect_err("queued execution cannot complete");
        assert_eq!(err.kind, jobhub_core::error::ErrorKind::InvalidTransition);

        e.cancel("no longer needed", now).expect("queued execution cancels");
        assert!(e.start(now).is_err());
        assert!(e.cancel("again", now).is_err());
    }

    #[test]
    fn test_retry_budget_is_exhausted() {
        let (mut e, now) = running(1);
        e.fail("boom", Some("trace".into()), now).expect("fails");
        assert!(e.can_retry());
        e.schedule_retry(now + Duration::seconds(5), 5).expect("retry allowed");
        assert_eq!(e.status, ExecutionStatus::Retrying);
        assert_eq!(e.retry_attempt, 1);

        e.start(now + Duration::seconds(5)).expect("retrying execution restarts");
        assert!(e.next_retry_at.is_none());
        e.timeout(now + Duration::seconds(10)).expect("times out");
        assert_eq!(e.retry_attempt, e.max_retry_attempts);
        assert!(!e.can_retry());
        assert!(e.schedule_retry(now, 1).is_err());
    }

    #[test]
    fn test_cancel_while_retrying() {
        let (mut e, now) = running(3);
        e.fail("boom", None, now).expect("fails");
        e.schedule_retry(now + Duration::seconds(5), 5).expect("retry allowed");
        e.cancel("operator", now).expect("retrying execution cancels");
        assert_eq!(e.status, ExecutionStatus::Cancelled);
        assert!(e.next_retry_at.is_none());
    }
}
