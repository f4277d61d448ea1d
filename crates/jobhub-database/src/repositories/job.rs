//! Job definition repository.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::traits::Repository;
use jobhub_core::types::{JobId, PageRequest, PageResponse};
use jobhub_entity::job::JobDefinition;

use super::db_err;
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository<JobDefinition, JobId> for JobRepository {
    async fn find_by_id(&self, id: &JobId) -> AppResult<Option<JobDefinition>> {
        sqlx::query_as::<_, JobDefinition>("SELECT * FROM job_definitions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to find job"))
    }

    async fn find_all(&self, page: &PageRequest) -> AppResult<PageResponse<JobDefinition>> {
        let total = self.count().await?;
        let jobs = sqlx::query_as::<_, JobDefinition>(
            "SELECT * FROM job_definitions ORDER BY name LIMIT $1 OFFSET $2",
        )
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list jobs"))?;

        Ok(PageResponse::new(jobs, page, total))
    }

    async fn create(&self, job: &JobDefinition) -> AppResult<JobDefinition> {
        sqlx::query_as::<_, JobDefinition>(
            "INSERT INTO job_definitions (id, name, description, job_type, status, timeout_seconds, \
             max_concurrent_executions, retry_policy, circuit_breaker_policy, allow_manual_trigger, \
             created_by, created_at, updated_by, updated_at, disabled_by, disabled_at, disabled_reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING *",
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.job_type)
        .bind(job.status)
        .bind(job.timeout_seconds)
        .bind(job.max_concurrent_executions)
        .bind(Json(&job.retry_policy))
        .bind(Json(&job.circuit_breaker_policy))
        .bind(job.allow_manual_trigger)
        .bind(&job.created_by)
        .bind(job.created_at)
        .bind(&job.updated_by)
        .bind(job.updated_at)
        .bind(&job.disabled_by)
        .bind(job.disabled_at)
        .bind(&job.disabled_reason)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to create job"))
    }

    async fn update(&self, job: &JobDefinition) -> AppResult<JobDefinition> {
        sqlx::query_as::<_, JobDefinition>(UPDATE_JOB_SQL)
            .bind(job.id)
            .bind(&job.name)
            .bind(&job.description)
            .bind(&job.job_type)
            .bind(job.status)
            .bind(job.timeout_seconds)
            .bind(job.max_concurrent_executions)
            .bind(Json(&job.retry_policy))
            .bind(Json(&job.circuit_breaker_policy))
            .bind(job.allow_manual_trigger)
            .bind(&job.updated_by)
            .bind(job.updated_at)
            .bind(&job.disabled_by)
            .bind(job.disabled_at)
            .bind(&job.disabled_reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to update job"))?
            .ok_or_else(|| AppError::not_found(format!("Job {} not found", job.id)))
    }

    async fn count(&self) -> AppResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_definitions")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to count jobs"))?;
        Ok(total as u64)
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn find_by_name(&self, name: &str) -> AppResult<Option<JobDefinition>> {
        sqlx::query_as::<_, JobDefinition>("SELECT * FROM job_definitions WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to find job by name"))
    }

    async fn find_with_breaker_enabled(&self) -> AppResult<Vec<JobDefinition>> {
        sqlx::query_as::<_, JobDefinition>(
            "SELECT * FROM job_definitions \
             WHERE status <> 'archived' \
             AND (circuit_breaker_policy->>'enabled')::boolean \
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list breaker-enabled jobs"))
    }
}

/// Shared with the breaker repository's transactional update.
pub(crate) const UPDATE_JOB_SQL: &str = "UPDATE job_definitions SET name = $2, description = $3, \
     job_type = $4, status = $5, timeout_seconds = $6, max_concurrent_executions = $7, \
     retry_policy = $8, circuit_breaker_policy = $9, allow_manual_trigger = $10, \
     updated_by = $11, updated_at = $12, disabled_by = $13, disabled_at = $14, \
     disabled_reason = $15 WHERE id = $1 RETURNING *";
