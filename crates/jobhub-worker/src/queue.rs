//! Manual triggers, cancellation, and execution inspection.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::types::{ExecutionId, JobId, PageRequest, PageResponse};
use jobhub_database::Stores;
use jobhub_entity::execution::{ExecutionStatus, JobExecution};
use jobhub_entity::job::JobStatus;

use crate::signal::SchedulerSignal;

/// Operator-facing entry point for executions.
#[derive(Debug, Clone)]
pub struct ExecutionQueue {
    stores: Stores,
    signal: Arc<SchedulerSignal>,
    instance_id: String,
}

impl ExecutionQueue {
    pub fn new(stores: Stores, signal: Arc<SchedulerSignal>, instance_id: impl Into<String>) -> Self {
        Self {
            stores,
            signal,
            instance_id: instance_id.into(),
        }
    }

    /// Queue a run of `job_id` now, bypassing its schedules.
    ///
    /// Concurrency limits still apply when the execution is dispatched.
    pub async fn trigger(
        &self,
        job_id: &JobId,
        triggered_by: &str,
        input: Option<serde_json::Value>,
    ) -> AppResult<JobExecution> {
        let job = self
            .stores
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))?;
        if !job.allow_manual_trigger {
            return Err(AppError::validation(format!(
                "Job '{}' does not allow manual triggers",
                job.name
            )));
        }
        if job.status != JobStatus::Active {
            return Err(AppError::conflict(format!(
                "Job '{}' is {} and cannot be triggered",
                job.name, job.status
            )));
        }

        let execution = JobExecution::manual(
            job.id,
            triggered_by,
            input,
            job.retry_policy.max_retries(),
            Utc::now(),
        )
        .on_host(&self.instance_id);
        let execution = self.stores.executions.create(&execution).await?;
        self.signal.notify_executions_changed();
        info!(
            execution_id = %execution.id,
            job = %job.name,
            triggered_by = %triggered_by,
            "Manual execution queued"
        );
        Ok(execution)
    }

    /// Cancel a queued, running, or retrying execution.
    ///
    /// A running handler is not interrupted; its outcome is discarded.
    pub async fn cancel(&self, execution_id: &ExecutionId, reason: &str) -> AppResult<JobExecution> {
        let mut execution = self.execution(execution_id).await?;
        let previous = execution.status;
        execution.cancel(reason, Utc::now())?;
        let execution = self
            .stores
            .executions
            .update_from(&execution, &[previous])
            .await?
            .ok_or_else(|| {
                AppError::conflict(format!(
                    "Execution {execution_id} changed while being cancelled; try again"
                ))
            })?;
        self.signal.notify_executions_changed();
        info!(execution_id = %execution_id, reason = %reason, "Execution cancelled");
        Ok(execution)
    }

    pub async fn execution(&self, execution_id: &ExecutionId) -> AppResult<JobExecution> {
        self.stores
            .executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Execution {execution_id} not found")))
    }

    /// History of one job, newest first.
    pub async fn executions_for_job(
        &self,
        job_id: &JobId,
        page: &PageRequest,
    ) -> AppResult<PageResponse<JobExecution>> {
        self.stores.executions.find_by_job(job_id, page).await
    }

    /// Executions waiting for or holding a slot, oldest first, at most `limit`.
    pub async fn running(&self, limit: usize) -> AppResult<Vec<JobExecution>> {
        let executions = &self.stores.executions;
        let mut found = executions.find_by_status(ExecutionStatus::Running, limit).await?;
        found.extend(executions.find_by_status(ExecutionStatus::Queued, limit).await?);
        found.sort_by_key(|e| (e.queued_at, e.id.0));
        found.truncate(limit);
        Ok(found)
    }

    /// Failed and timed-out executions queued at or after `since`, most
    /// recently completed first.
    pub async fn failed_since(&self, since: DateTime<Utc>, limit: usize) -> AppResult<Vec<JobExecution>> {
        self.stores.executions.find_failed_since(since, limit).await
    }

    /// Failures of the current UTC day.
    pub async fn failed_today(&self, limit: usize) -> AppResult<Vec<JobExecution>> {
        let day_start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        self.failed_since(day_start, limit).await
    }

    pub async fn stats(&self) -> AppResult<QueueStats> {
        let mut stats = QueueStats {
            instance_id: self.instance_id.clone(),
            ..QueueStats::default()
        };
        for row in self.stores.executions.count_by_status().await? {
            let slot = match row.status {
                ExecutionStatus::Queued => &mut stats.queued,
                ExecutionStatus::Running => &mut stats.running,
                ExecutionStatus::Retrying => &mut stats.retrying,
                ExecutionStatus::Succeeded => &mut stats.succeeded,
                ExecutionStatus::Failed => &mut stats.failed,
                ExecutionStatus::TimedOut => &mut stats.timed_out,
                ExecutionStatus::Cancelled => &mut stats.cancelled,
                ExecutionStatus::Skipped => &mut stats.skipped,
            };
            *slot += row.count;
        }
        Ok(stats)
    }
}

/// Execution counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub retrying: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub timed_out: i64,
    pub cancelled: i64,
    pub skipped: i64,
    pub instance_id: String,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use jobhub_core::error::ErrorKind;
    use jobhub_database::MemoryStore;
    use jobhub_entity::job::{JobDefinition, NewJob};

    async fn setup(active: bool) -> (ExecutionQueue, Arc<SchedulerSignal>, JobDefinition) {
        let stores = Stores::memory(Arc::new(MemoryStore::new()));
        let mut job = JobDefinition::new(NewJob::new("reindex", "reindex", 120, "tests"), Utc::now())
            .expect("valid job");
        if active {
            job.activate("tests", Utc::now());
        }
        stores.jobs.create(&job).await.expect("job stored");
        let signal = Arc::new(SchedulerSignal::new());
        (ExecutionQueue::new(stores, signal.clone(), "instance-a"), signal, job)
    }

    #[tokio::test]
    async fn test_trigger_queues_manual_execution_and_wakes_scheduler() {
        let (queue, signal, job) = setup(true).await;
        let input = serde_json::json!({ "full": true });
        let execution = queue.trigger(&job.id, "ops", Some(input.clone())).await.expect("queued");

        assert_eq!(execution.status, ExecutionStatus::Queued);
        assert!(execution.is_manual);
        assert!(execution.schedule_id.is_none());
        assert_eq!(execution.input, Some(input));
        assert_eq!(execution.host_instance.as_deref(), Some("instance-a"));
        assert!(signal.wait_for_signal(Duration::ZERO).await);

        let stats = queue.stats().await.expect("stats");
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.instance_id, "instance-a");
    }

    #[tokio::test]
    async fn test_trigger_rejects_inactive_or_unknown_job() {
        let (queue, _signal, job) = setup(false).await;
        let err = queue.trigger(&job.id, "ops", None).await.expect_err("draft job");
        assert_eq!(err.kind, ErrorKind::Conflict);

        let err = queue.trigger(&JobId::new(), "ops", None).await.expect_err("unknown job");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let (queue, _signal, job) = setup(true).await;
        let execution = queue.trigger(&job.id, "ops", None).await.expect("queued");

        let cancelled = queue.cancel(&execution.id, "duplicate run").await.expect("cancelled");
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert_eq!(cancelled.error_message.as_deref(), Some("Cancelled: duplicate run"));

        let err = queue.cancel(&execution.id, "again").await.expect_err("already terminal");
        assert_eq!(err.kind, ErrorKind::InvalidTransition);

        let history = queue
            .executions_for_job(&job.id, &PageRequest::default())
            .await
            .expect("history");
        assert_eq!(history.total_items, 1);
        assert_eq!(queue.stats().await.expect("stats").cancelled, 1);
    }

    #[tokio::test]
    async fn test_running_and_failed_views() {
        let (queue, _signal, job) = setup(true).await;
        let waiting = queue.trigger(&job.id, "ops", None).await.expect("queued");

        let mut running = JobExecution::manual(job.id, "ops", None, 0, Utc::now());
        running.start(Utc::now()).expect("start");
        queue.stores.executions.create(&running).await.expect("stored");

        let mut failed = JobExecution::manual(job.id, "ops", None, 0, Utc::now());
        failed.start(Utc::now()).expect("start");
        failed.fail("disk full", None, Utc::now()).expect("fail");
        queue.stores.executions.create(&failed).await.expect("stored");

        let active = queue.running(10).await.expect("running");
        let ids: Vec<_> = active.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![waiting.id, running.id]);

        let today = queue.failed_today(10).await.expect("failed");
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].error_message.as_deref(), Some("disk full"));
        let tomorrow = Utc::now() + chrono::Duration::days(1);
        assert!(queue.failed_since(tomorrow, 10).await.expect("failed").is_empty());
    }
}
