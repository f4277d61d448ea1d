//! Circuit breaker repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::types::JobId;
use jobhub_entity::circuit::JobCircuitBreaker;
use jobhub_entity::job::JobDefinition;

use super::db_err;
use super::job::UPDATE_JOB_SQL;
use crate::store::CircuitBreakerStore;

const UPSERT_BREAKER_SQL: &str = "INSERT INTO job_circuit_breakers (id, job_id, state, \
     consecutive_failures, last_failure_at, opened_at, last_state_change_at, \
     half_open_attempts, open_reason, opened_by) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
     ON CONFLICT (job_id) DO UPDATE SET state = EXCLUDED.state, \
     consecutive_failures = EXCLUDED.consecutive_failures, \
     last_failure_at = EXCLUDED.last_failure_at, opened_at = EXCLUDED.opened_at, \
     last_state_change_at = EXCLUDED.last_state_change_at, \
     half_open_attempts = EXCLUDED.half_open_attempts, \
     open_reason = EXCLUDED.open_reason, opened_by = EXCLUDED.opened_by";

#[derive(Debug, Clone)]
pub struct CircuitBreakerRepository {
    pool: PgPool,
}

impl CircuitBreakerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert<'e, E>(executor: E, b: &JobCircuitBreaker) -> AppResult<()>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(UPSERT_BREAKER_SQL)
            .bind(b.id)
            .bind(b.job_id)
            .bind(b.state)
            .bind(b.consecutive_failures)
            .bind(b.last_failure_at)
            .bind(b.opened_at)
            .bind(b.last_state_change_at)
            .bind(b.half_open_attempts)
            .bind(&b.open_reason)
            .bind(&b.opened_by)
            .execute(executor)
            .await
            .map_err(db_err("Failed to save circuit breaker"))?;
        Ok(())
    }
}

#[async_trait]
impl CircuitBreakerStore for CircuitBreakerRepository {
    async fn find_by_job(&self, job_id: &JobId) -> AppResult<Option<JobCircuitBreaker>> {
        sqlx::query_as::<_, JobCircuitBreaker>(
            "SELECT * FROM job_circuit_breakers WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to find circuit breaker"))
    }

    async fn get_or_create(&self, job_id: &JobId, now: DateTime<Utc>) -> AppResult<JobCircuitBreaker> {
        let fresh = JobCircuitBreaker::new(*job_id, now);
        // A concurrent creator wins the insert; we then read its row.
        sqlx::query(
            "INSERT INTO job_circuit_breakers (id, job_id, state, consecutive_failures, \
             last_state_change_at, half_open_attempts) \
             VALUES ($1, $2, $3, 0, $4, 0) ON CONFLICT (job_id) DO NOTHING",
        )
        .bind(fresh.id)
        .bind(fresh.job_id)
        .bind(fresh.state)
        .bind(fresh.last_state_change_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to create circuit breaker"))?;

        self.find_by_job(job_id).await?.ok_or_else(|| {
            AppError::database(format!("Circuit breaker for job {job_id} vanished after insert"))
        })
    }

    async fn save(&self, breaker: &JobCircuitBreaker) -> AppResult<()> {
        Self::upsert(&self.pool, breaker).await
    }

    async fn save_transition(
        &self,
        breaker: &JobCircuitBreaker,
        job: Option<&JobDefinition>,
    ) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin breaker transaction"))?;

        Self::upsert(&mut *tx, breaker).await?;

        if let Some(job) = job {
            let updated = sqlx::query(UPDATE_JOB_SQL)
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
                .execute(&mut *tx)
                .await
                .map_err(db_err("Failed to update job with breaker transition"))?;
            if updated.rows_affected() == 0 {
                return Err(AppError::not_found(format!("Job {} not found", job.id)));
            }
        }

        tx.commit()
            .await
            .map_err(db_err("Failed to commit breaker transaction"))
    }
}
