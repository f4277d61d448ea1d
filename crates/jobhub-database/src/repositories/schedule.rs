//! Job schedule repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::traits::Repository;
use jobhub_core::types::{JobId, PageRequest, PageResponse, ScheduleId};
use jobhub_entity::schedule::JobSchedule;

use super::db_err;
use crate::store::ScheduleStore;

#[derive(Debug, Clone)]
pub struct ScheduleRepository {
    pool: PgPool,
}

impl ScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository<JobSchedule, ScheduleId> for ScheduleRepository {
    async fn find_by_id(&self, id: &ScheduleId) -> AppResult<Option<JobSchedule>> {
        sqlx::query_as::<_, JobSchedule>("SELECT * FROM job_schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to find schedule"))
    }

    async fn find_all(&self, page: &PageRequest) -> AppResult<PageResponse<JobSchedule>> {
        let total = self.count().await?;
        let schedules = sqlx::query_as::<_, JobSchedule>(
            "SELECT * FROM job_schedules ORDER BY created_at LIMIT $1 OFFSET $2",
        )
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list schedules"))?;

        Ok(PageResponse::new(schedules, page, total))
    }

    async fn create(&self, schedule: &JobSchedule) -> AppResult<JobSchedule> {
        sqlx::query_as::<_, JobSchedule>(
            "INSERT INTO job_schedules (id, job_id, rule, is_active, start_date, end_date, \
             last_execution, next_execution, created_by, created_at, updated_by, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING *",
        )
        .bind(schedule.id)
        .bind(schedule.job_id)
        .bind(Json(&schedule.rule))
        .bind(schedule.is_active)
        .bind(schedule.start_date)
        .bind(schedule.end_date)
        .bind(schedule.last_execution)
        .bind(schedule.next_execution)
        .bind(&schedule.created_by)
        .bind(schedule.created_at)
        .bind(&schedule.updated_by)
        .bind(schedule.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to create schedule"))
    }

    async fn update(&self, schedule: &JobSchedule) -> AppResult<JobSchedule> {
        sqlx::query_as::<_, JobSchedule>(
            "UPDATE job_schedules SET rule = $2, is_active = $3, start_date = $4, end_date = $5, \
             last_execution = $6, next_execution = $7, updated_by = $8, updated_at = $9 \
             WHERE id = $1 RETURNING *",
        )
        .bind(schedule.id)
        .bind(Json(&schedule.rule))
        .bind(schedule.is_active)
        .bind(schedule.start_date)
        .bind(schedule.end_date)
        .bind(schedule.last_execution)
        .bind(schedule.next_execution)
        .bind(&schedule.updated_by)
        .bind(schedule.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to update schedule"))?
        .ok_or_else(|| AppError::not_found(format!("Schedule {} not found", schedule.id)))
    }

    async fn count(&self) -> AppResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_schedules")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to count schedules"))?;
        Ok(total as u64)
    }
}

#[async_trait]
impl ScheduleStore for ScheduleRepository {
    async fn find_due(&self, now: DateTime<Utc>) -> AppResult<Vec<JobSchedule>> {
        sqlx::query_as::<_, JobSchedule>(
            "SELECT * FROM job_schedules \
             WHERE is_active \
             AND next_execution IS NOT NULL AND next_execution <= $1 \
             AND (start_date IS NULL OR start_date <= $1) \
             AND (end_date IS NULL OR end_date >= $1) \
             ORDER BY next_execution",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to query due schedules"))
    }

    async fn find_by_job(&self, job_id: &JobId) -> AppResult<Vec<JobSchedule>> {
        sqlx::query_as::<_, JobSchedule>(
            "SELECT * FROM job_schedules WHERE job_id = $1 ORDER BY created_at",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list schedules for job"))
    }
}
