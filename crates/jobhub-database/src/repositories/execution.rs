//! Job execution repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::traits::Repository;
use jobhub_core::types::{ExecutionId, JobId, PageRequest, PageResponse};
use jobhub_entity::execution::{ExecutionStatus, JobExecution};

use super::{db_err, sql_limit};
use crate::store::{ExecutionStore, StatusCount};

const INSERT_EXECUTION_SQL: &str = "INSERT INTO job_executions (id, job_id, schedule_id, \
     status, queued_at, started_at, completed_at, duration_seconds, retry_attempt, \
     max_retry_attempts, next_retry_at, retry_delay_seconds, input, output, error_message, \
     stack_trace, triggered_by, is_manual, host_instance) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
     RETURNING *";

const UPDATE_EXECUTION_SQL: &str = "UPDATE job_executions SET status = $2, started_at = $3, \
     completed_at = $4, duration_seconds = $5, retry_attempt = $6, next_retry_at = $7, \
     retry_delay_seconds = $8, output = $9, error_message = $10, stack_trace = $11, \
     host_instance = $12 \
     WHERE id = $1 RETURNING *";

const UPDATE_EXECUTION_FROM_SQL: &str = "UPDATE job_executions SET status = $2, started_at = $3, \
     completed_at = $4, duration_seconds = $5, retry_attempt = $6, next_retry_at = $7, \
     retry_delay_seconds = $8, output = $9, error_message = $10, stack_trace = $11, \
     host_instance = $12 \
     WHERE id = $1 AND status = ANY($13) RETURNING *";

/// Statuses an execution can be started from.
const STARTABLE: [ExecutionStatus; 2] = [ExecutionStatus::Queued, ExecutionStatus::Retrying];

#[derive(Debug, Clone)]
pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count_in<'e, E>(executor: E, job_id: &JobId, statuses: &[ExecutionStatus]) -> AppResult<u64>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job_executions WHERE job_id = $1 AND status = ANY($2)",
        )
        .bind(job_id)
        .bind(statuses)
        .fetch_one(executor)
        .await
        .map_err(db_err("Failed to count executions"))?;
        Ok(total as u64)
    }

    /// Row-lock the job so limit checks against it run one at a time.
    async fn lock_job<'e, E>(executor: E, job_id: &JobId) -> AppResult<()>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query("SELECT 1 FROM job_definitions WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(executor)
            .await
            .map_err(db_err("Failed to lock job row"))?
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))
    }

    async fn insert<'e, E>(executor: E, e: &JobExecution) -> AppResult<JobExecution>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, JobExecution>(INSERT_EXECUTION_SQL)
            .bind(e.id)
            .bind(e.job_id)
            .bind(e.schedule_id)
            .bind(e.status)
            .bind(e.queued_at)
            .bind(e.started_at)
            .bind(e.completed_at)
            .bind(e.duration_seconds)
            .bind(e.retry_attempt)
            .bind(e.max_retry_attempts)
            .bind(e.next_retry_at)
            .bind(e.retry_delay_seconds)
            .bind(&e.input)
            .bind(&e.output)
            .bind(&e.error_message)
            .bind(&e.stack_trace)
            .bind(&e.triggered_by)
            .bind(e.is_manual)
            .bind(&e.host_instance)
            .fetch_one(executor)
            .await
            .map_err(db_err("Failed to create execution"))
    }

    /// Write every mutable column. With `expected`, only a row still in one
    /// of those statuses is touched.
    async fn write<'e, E>(
        executor: E,
        e: &JobExecution,
        expected: Option<&[ExecutionStatus]>,
    ) -> AppResult<Option<JobExecution>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let sql = match expected {
            Some(_) => UPDATE_EXECUTION_FROM_SQL,
            None => UPDATE_EXECUTION_SQL,
        };
        let mut query = sqlx::query_as::<_, JobExecution>(sql)
            .bind(e.id)
            .bind(e.status)
            .bind(e.started_at)
            .bind(e.completed_at)
            .bind(e.duration_seconds)
            .bind(e.retry_attempt)
            .bind(e.next_retry_at)
            .bind(e.retry_delay_seconds)
            .bind(&e.output)
            .bind(&e.error_message)
            .bind(&e.stack_trace)
            .bind(&e.host_instance);
        if let Some(expected) = expected {
            query = query.bind(expected);
        }
        query
            .fetch_optional(executor)
            .await
            .map_err(db_err("Failed to update execution"))
    }
}

#[async_trait]
impl Repository<JobExecution, ExecutionId> for ExecutionRepository {
    async fn find_by_id(&self, id: &ExecutionId) -> AppResult<Option<JobExecution>> {
        sqlx::query_as::<_, JobExecution>("SELECT * FROM job_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to find execution"))
    }

    async fn find_all(&self, page: &PageRequest) -> AppResult<PageResponse<JobExecution>> {
        let total = self.count().await?;
        let executions = sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions ORDER BY queued_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list executions"))?;

        Ok(PageResponse::new(executions, page, total))
    }

    async fn create(&self, e: &JobExecution) -> AppResult<JobExecution> {
        Self::insert(&self.pool, e).await
    }

    async fn update(&self, e: &JobExecution) -> AppResult<JobExecution> {
        Self::write(&self.pool, e, None)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Execution {} not found", e.id)))
    }

    async fn count(&self) -> AppResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_executions")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to count executions"))?;
        Ok(total as u64)
    }
}

#[async_trait]
impl ExecutionStore for ExecutionRepository {
    async fn find_by_status(
        &self,
        status: ExecutionStatus,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>> {
        sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions WHERE status = $1 ORDER BY queued_at LIMIT $2",
        )
        .bind(status)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to query executions by status"))
    }

    async fn find_retries_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>> {
        sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions \
             WHERE status = 'retrying' AND next_retry_at <= $1 \
             ORDER BY next_retry_at LIMIT $2",
        )
        .bind(now)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to query due retries"))
    }

    async fn count_active(&self, job_id: &JobId) -> AppResult<u64> {
        Self::count_in(&self.pool, job_id, &ExecutionStatus::ACTIVE).await
    }

    async fn count_running(&self, job_id: &JobId) -> AppResult<u64> {
        Self::count_in(&self.pool, job_id, &[ExecutionStatus::Running]).await
    }

    async fn find_recent_by_job(&self, job_id: &JobId, limit: usize) -> AppResult<Vec<JobExecution>> {
        sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions WHERE job_id = $1 ORDER BY queued_at DESC LIMIT $2",
        )
        .bind(job_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to query recent executions"))
    }

    async fn find_by_job_since(
        &self,
        job_id: &JobId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>> {
        sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions WHERE job_id = $1 AND queued_at >= $2 \
             ORDER BY queued_at DESC LIMIT $3",
        )
        .bind(job_id)
        .bind(since)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to query executions since instant"))
    }

    async fn find_by_job(
        &self,
        job_id: &JobId,
        page: &PageRequest,
    ) -> AppResult<PageResponse<JobExecution>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_executions WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to count executions for job"))?;

        let executions = sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions WHERE job_id = $1 \
             ORDER BY queued_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(job_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list executions for job"))?;

        Ok(PageResponse::new(executions, page, total as u64))
    }

    async fn count_by_status(&self) -> AppResult<Vec<StatusCount>> {
        sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM job_executions GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to count executions by status"))
    }

    async fn find_failed_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>> {
        sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions \
             WHERE status IN ('failed', 'timed_out') AND queued_at >= $1 \
             ORDER BY completed_at DESC NULLS LAST LIMIT $2",
        )
        .bind(since)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to query failed executions"))
    }

    async fn create_within_limit(
        &self,
        execution: &JobExecution,
        max_active: u64,
    ) -> AppResult<Option<JobExecution>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin execution transaction"))?;

        Self::lock_job(&mut *tx, &execution.job_id).await?;
        let active = Self::count_in(&mut *tx, &execution.job_id, &ExecutionStatus::ACTIVE).await?;
        if active >= max_active {
            return Ok(None);
        }
        let created = Self::insert(&mut *tx, execution).await?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit execution insert"))?;
        Ok(Some(created))
    }

    async fn try_start(
        &self,
        execution: &JobExecution,
        max_running: u64,
    ) -> AppResult<Option<JobExecution>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin execution transaction"))?;

        Self::lock_job(&mut *tx, &execution.job_id).await?;
        let running = Self::count_in(&mut *tx, &execution.job_id, &[ExecutionStatus::Running]).await?;
        if running >= max_running {
            return Ok(None);
        }
        let started = Self::write(&mut *tx, execution, Some(STARTABLE.as_slice())).await?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit execution start"))?;
        Ok(started)
    }

    async fn update_from(
        &self,
        execution: &JobExecution,
        expected: &[ExecutionStatus],
    ) -> AppResult<Option<JobExecution>> {
        Self::write(&self.pool, execution, Some(expected)).await
    }
}
