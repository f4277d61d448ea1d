//! Store traits consumed by the scheduler.
//!
//! Each trait extends the generic [`Repository`] with the query shapes the
//! orchestrator, the breaker monitor, and the inspection API rely on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use jobhub_core::result::AppResult;
use jobhub_core::traits::Repository;
use jobhub_core::types::{ExecutionId, JobId, PageRequest, PageResponse, ScheduleId};
use jobhub_entity::circuit::JobCircuitBreaker;
use jobhub_entity::execution::{ExecutionStatus, JobExecution};
use jobhub_entity::job::JobDefinition;
use jobhub_entity::schedule::JobSchedule;

use crate::memory::MemoryStore;
use crate::repositories::{
    CircuitBreakerRepository, ExecutionRepository, JobRepository, ScheduleRepository,
};

/// Job definitions.
#[async_trait]
pub trait JobStore: Repository<JobDefinition, JobId> {
    async fn find_by_name(&self, name: &str) -> AppResult<Option<JobDefinition>>;

    /// Non-archived jobs whose circuit-breaker policy is enabled.
    async fn find_with_breaker_enabled(&self) -> AppResult<Vec<JobDefinition>>;
}

/// Job schedules.
#[async_trait]
pub trait ScheduleStore: Repository<JobSchedule, ScheduleId> {
    /// Active schedules inside their window whose `next_execution <= now`, oldest first.
    async fn find_due(&self, now: DateTime<Utc>) -> AppResult<Vec<JobSchedule>>;

    async fn find_by_job(&self, job_id: &JobId) -> AppResult<Vec<JobSchedule>>;
}

/// Execution history.
#[async_trait]
pub trait ExecutionStore: Repository<JobExecution, ExecutionId> {
    /// Executions in `status`, oldest queued first, at most `limit`.
    async fn find_by_status(
        &self,
        status: ExecutionStatus,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>>;

    /// Retrying executions whose `next_retry_at <= now`, earliest first.
    async fn find_retries_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>>;

    /// Queued + Running executions of a job.
    async fn count_active(&self, job_id: &JobId) -> AppResult<u64>;

    /// Running executions of a job.
    async fn count_running(&self, job_id: &JobId) -> AppResult<u64>;

    /// The newest `limit` executions of a job, newest first.
    async fn find_recent_by_job(&self, job_id: &JobId, limit: usize) -> AppResult<Vec<JobExecution>>;

    /// Executions of a job queued at or after `since`, newest first, at most `limit`.
    async fn find_by_job_since(
        &self,
        job_id: &JobId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>>;

    /// Paged history of a job, newest first.
    async fn find_by_job(
        &self,
        job_id: &JobId,
        page: &PageRequest,
    ) -> AppResult<PageResponse<JobExecution>>;

    /// Number of executions per status.
    async fn count_by_status(&self) -> AppResult<Vec<StatusCount>>;

    /// Failed and timed-out executions queued at or after `since`, most
    /// recently completed first.
    async fn find_failed_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>>;

    /// Insert `execution` unless its job already has `max_active` queued or
    /// running executions. `None` when the job is at its limit.
    ///
    /// The count and the insert are serialized per job across every caller.
    async fn create_within_limit(
        &self,
        execution: &JobExecution,
        max_active: u64,
    ) -> AppResult<Option<JobExecution>>;

    /// Persist a started execution while the stored row is still queued or
    /// retrying and its job has fewer than `max_running` running executions.
    ///
    /// `None` when another caller started it first or the job is at its limit.
    async fn try_start(
        &self,
        execution: &JobExecution,
        max_running: u64,
    ) -> AppResult<Option<JobExecution>>;

    /// Overwrite the stored execution only while its status is one of
    /// `expected`. `None` when the row moved on in the meantime.
    async fn update_from(
        &self,
        execution: &JobExecution,
        expected: &[ExecutionStatus],
    ) -> AppResult<Option<JobExecution>>;
}

/// Circuit breakers, one per job.
#[async_trait]
pub trait CircuitBreakerStore: Send + Sync + 'static {
    async fn find_by_job(&self, job_id: &JobId) -> AppResult<Option<JobCircuitBreaker>>;

    /// Return the job's breaker, creating a closed one on first use.
    async fn get_or_create(&self, job_id: &JobId, now: DateTime<Utc>) -> AppResult<JobCircuitBreaker>;

    /// Insert or overwrite a breaker.
    async fn save(&self, breaker: &JobCircuitBreaker) -> AppResult<()>;

    /// Persist a breaker transition together with the job status change it implies.
    ///
    /// Both rows are written or neither is.
    async fn save_transition(
        &self,
        breaker: &JobCircuitBreaker,
        job: Option<&JobDefinition>,
    ) -> AppResult<()>;
}

/// One row of [`ExecutionStore::count_by_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: ExecutionStatus,
    pub count: i64,
}

/// The four stores as shared trait objects.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub breakers: Arc<dyn CircuitBreakerStore>,
}

impl Stores {
    /// PostgreSQL repositories sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            jobs: Arc::new(JobRepository::new(pool.clone())),
            schedules: Arc::new(ScheduleRepository::new(pool.clone())),
            executions: Arc::new(ExecutionRepository::new(pool.clone())),
            breakers: Arc::new(CircuitBreakerRepository::new(pool)),
        }
    }

    /// All four stores backed by one in-memory state.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            jobs: store.clone(),
            schedules: store.clone(),
            executions: store.clone(),
            breakers: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
