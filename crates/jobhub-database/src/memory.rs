//! In-memory implementation of every store trait.
//!
//! All four entity maps sit behind one lock, so `save_transition` is atomic
//! the same way the PostgreSQL transaction is. Suitable for tests and for
//! single-process deployments that do not need durable history.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_core::traits::Repository;
use jobhub_core::types::{ExecutionId, JobId, PageRequest, PageResponse, ScheduleId};
use jobhub_entity::circuit::JobCircuitBreaker;
use jobhub_entity::execution::{ExecutionStatus, JobExecution};
use jobhub_entity::job::{JobDefinition, JobStatus};
use jobhub_entity::schedule::JobSchedule;

use crate::store::{
    CircuitBreakerStore, ExecutionStore, JobStore, ScheduleStore, StatusCount,
};

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<JobId, JobDefinition>,
    schedules: HashMap<ScheduleId, JobSchedule>,
    executions: HashMap<ExecutionId, JobExecution>,
    breakers: HashMap<JobId, JobCircuitBreaker>,
}

impl MemoryState {
    fn count_in(&self, job_id: &JobId, statuses: &[ExecutionStatus]) -> u64 {
        self.executions
            .values()
            .filter(|e| e.job_id == *job_id && statuses.contains(&e.status))
            .count() as u64
    }

    /// Swap in `execution` if the stored copy is in one of `expected`.
    fn replace_from(
        &mut self,
        execution: &JobExecution,
        expected: &[ExecutionStatus],
    ) -> Option<JobExecution> {
        let slot = self.executions.get_mut(&execution.id)?;
        if !expected.contains(&slot.status) {
            return None;
        }
        *slot = execution.clone();
        Some(execution.clone())
    }
}

/// Process-local store for jobs, schedules, executions, and breakers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page_of<T>(mut items: Vec<T>, page: &PageRequest) -> PageResponse<T> {
    let total = items.len() as u64;
    let start = usize::try_from(page.offset()).unwrap_or(usize::MAX).min(items.len());
    let end = start
        .saturating_add(usize::try_from(page.limit()).unwrap_or(usize::MAX))
        .min(items.len());
    let items: Vec<T> = items.drain(start..end).collect();
    PageResponse::new(items, page, total)
}

fn newest_first(executions: &mut [JobExecution]) {
    executions.sort_by(|a, b| b.queued_at.cmp(&a.queued_at).then(b.id.0.cmp(&a.id.0)));
}

#[async_trait]
impl Repository<JobDefinition, JobId> for MemoryStore {
    async fn find_by_id(&self, id: &JobId) -> AppResult<Option<JobDefinition>> {
        Ok(self.state.read().await.jobs.get(id).cloned())
    }

    async fn find_all(&self, page: &PageRequest) -> AppResult<PageResponse<JobDefinition>> {
        let mut jobs: Vec<_> = self.state.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(page_of(jobs, page))
    }

    async fn create(&self, job: &JobDefinition) -> AppResult<JobDefinition> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(AppError::conflict(format!("Job {} already exists", job.id)));
        }
        if state.jobs.values().any(|j| j.name == job.name) {
            return Err(AppError::conflict(format!("Job name '{}' is taken", job.name)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn update(&self, job: &JobDefinition) -> AppResult<JobDefinition> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(job.clone())
            }
            None => Err(AppError::not_found(format!("Job {} not found", job.id))),
        }
    }

    async fn count(&self) -> AppResult<u64> {
        Ok(self.state.read().await.jobs.len() as u64)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn find_by_name(&self, name: &str) -> AppResult<Option<JobDefinition>> {
        let state = self.state.read().await;
        Ok(state.jobs.values().find(|j| j.name == name).cloned())
    }

    async fn find_with_breaker_enabled(&self) -> AppResult<Vec<JobDefinition>> {
        let state = self.state.read().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.status != JobStatus::Archived && j.circuit_breaker_policy.enabled())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id.0);
        Ok(jobs)
    }
}

#[async_trait]
impl Repository<JobSchedule, ScheduleId> for MemoryStore {
    async fn find_by_id(&self, id: &ScheduleId) -> AppResult<Option<JobSchedule>> {
        Ok(self.state.read().await.schedules.get(id).cloned())
    }

    async fn find_all(&self, page: &PageRequest) -> AppResult<PageResponse<JobSchedule>> {
        let mut schedules: Vec<_> = self.state.read().await.schedules.values().cloned().collect();
        schedules.sort_by_key(|s| s.created_at);
        Ok(page_of(schedules, page))
    }

    async fn create(&self, schedule: &JobSchedule) -> AppResult<JobSchedule> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&schedule.job_id) {
            return Err(AppError::not_found(format!("Job {} not found", schedule.job_id)));
        }
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule.clone())
    }

    async fn update(&self, schedule: &JobSchedule) -> AppResult<JobSchedule> {
        let mut state = self.state.write().await;
        match state.schedules.get_mut(&schedule.id) {
            Some(slot) => {
                *slot = schedule.clone();
                Ok(schedule.clone())
            }
            None => Err(AppError::not_found(format!("Schedule {} not found", schedule.id))),
        }
    }

    async fn count(&self) -> AppResult<u64> {
        Ok(self.state.read().await.schedules.len() as u64)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn find_due(&self, now: DateTime<Utc>) -> AppResult<Vec<JobSchedule>> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state.schedules.values().filter(|s| s.is_due(now)).cloned().collect();
        due.sort_by_key(|s| s.next_execution);
        Ok(due)
    }

    async fn find_by_job(&self, job_id: &JobId) -> AppResult<Vec<JobSchedule>> {
        let state = self.state.read().await;
        let mut schedules: Vec<_> = state
            .schedules
            .values()
            .filter(|s| s.job_id == *job_id)
            .cloned()
            .collect();
        schedules.sort_by_key(|s| s.created_at);
        Ok(schedules)
    }
}

#[async_trait]
impl Repository<JobExecution, ExecutionId> for MemoryStore {
    async fn find_by_id(&self, id: &ExecutionId) -> AppResult<Option<JobExecution>> {
        Ok(self.state.read().await.executions.get(id).cloned())
    }

    async fn find_all(&self, page: &PageRequest) -> AppResult<PageResponse<JobExecution>> {
        let mut executions: Vec<_> = self.state.read().await.executions.values().cloned().collect();
        newest_first(&mut executions);
        Ok(page_of(executions, page))
    }

    async fn create(&self, execution: &JobExecution) -> AppResult<JobExecution> {
        let mut state = self.state.write().await;
        if state.executions.contains_key(&execution.id) {
            return Err(AppError::conflict(format!("Execution {} already exists", execution.id)));
        }
        state.executions.insert(execution.id, execution.clone());
        Ok(execution.clone())
    }

    async fn update(&self, execution: &JobExecution) -> AppResult<JobExecution> {
        let mut state = self.state.write().await;
        match state.executions.get_mut(&execution.id) {
            Some(slot) => {
                *slot = execution.clone();
                Ok(execution.clone())
            }
            None => Err(AppError::not_found(format!("Execution {} not found", execution.id))),
        }
    }

    async fn count(&self) -> AppResult<u64> {
        Ok(self.state.read().await.executions.len() as u64)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn find_by_status(
        &self,
        status: ExecutionStatus,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>> {
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.queued_at, e.id.0));
        found.truncate(limit);
        Ok(found)
    }

    async fn find_retries_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>> {
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::Retrying && e.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        found.sort_by_key(|e| e.next_retry_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn count_active(&self, job_id: &JobId) -> AppResult<u64> {
        Ok(self.state.read().await.count_in(job_id, &ExecutionStatus::ACTIVE))
    }

    async fn count_running(&self, job_id: &JobId) -> AppResult<u64> {
        Ok(self.state.read().await.count_in(job_id, &[ExecutionStatus::Running]))
    }

    async fn find_recent_by_job(&self, job_id: &JobId, limit: usize) -> AppResult<Vec<JobExecution>> {
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.job_id == *job_id)
            .cloned()
            .collect();
        newest_first(&mut found);
        found.truncate(limit);
        Ok(found)
    }

    async fn find_by_job_since(
        &self,
        job_id: &JobId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>> {
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.job_id == *job_id && e.queued_at >= since)
            .cloned()
            .collect();
        newest_first(&mut found);
        found.truncate(limit);
        Ok(found)
    }

    async fn find_by_job(
        &self,
        job_id: &JobId,
        page: &PageRequest,
    ) -> AppResult<PageResponse<JobExecution>> {
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.job_id == *job_id)
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(page_of(found, page))
    }

    async fn count_by_status(&self) -> AppResult<Vec<StatusCount>> {
        let state = self.state.read().await;
        let mut counts: HashMap<ExecutionStatus, i64> = HashMap::new();
        for execution in state.executions.values() {
            *counts.entry(execution.status).or_default() += 1;
        }
        let mut rows: Vec<_> = counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect();
        rows.sort_by_key(|r| r.status.as_str());
        Ok(rows)
    }

    async fn find_failed_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<JobExecution>> {
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.status.is_failure() && e.queued_at >= since)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn create_within_limit(
        &self,
        execution: &JobExecution,
        max_active: u64,
    ) -> AppResult<Option<JobExecution>> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&execution.job_id) {
            return Err(AppError::not_found(format!("Job {} not found", execution.job_id)));
        }
        if state.executions.contains_key(&execution.id) {
            return Err(AppError::conflict(format!("Execution {} already exists", execution.id)));
        }
        if state.count_in(&execution.job_id, &ExecutionStatus::ACTIVE) >= max_active {
            return Ok(None);
        }
        state.executions.insert(execution.id, execution.clone());
        Ok(Some(execution.clone()))
    }

    async fn try_start(
        &self,
        execution: &JobExecution,
        max_running: u64,
    ) -> AppResult<Option<JobExecution>> {
        let mut state = self.state.write().await;
        if state.count_in(&execution.job_id, &[ExecutionStatus::Running]) >= max_running {
            return Ok(None);
        }
        Ok(state.replace_from(
            execution,
            &[ExecutionStatus::Queued, ExecutionStatus::Retrying],
        ))
    }

    async fn update_from(
        &self,
        execution: &JobExecution,
        expected: &[ExecutionStatus],
    ) -> AppResult<Option<JobExecution>> {
        Ok(self.state.write().await.replace_from(execution, expected))
    }
}

#[async_trait]
impl CircuitBreakerStore for MemoryStore {
    async fn find_by_job(&self, job_id: &JobId) -> AppResult<Option<JobCircuitBreaker>> {
        Ok(self.state.read().await.breakers.get(job_id).cloned())
    }

    async fn get_or_create(&self, job_id: &JobId, now: DateTime<Utc>) -> AppResult<JobCircuitBreaker> {
        let mut state = self.state.write().await;
        Ok(state
            .breakers
            .entry(*job_id)
            .or_insert_with(|| JobCircuitBreaker::new(*job_id, now))
            .clone())
    }

    async fn save(&self, breaker: &JobCircuitBreaker) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.breakers.insert(breaker.job_id, breaker.clone());
        Ok(())
    }

    async fn save_transition(
        &self,
        breaker: &JobCircuitBreaker,
        job: Option<&JobDefinition>,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        if let Some(job) = job {
            if !state.jobs.contains_key(&job.id) {
                return Err(AppError::not_found(format!("Job {} not found", job.id)));
            }
            state.jobs.insert(job.id, job.clone());
        }
        state.breakers.insert(breaker.job_id, breaker.clone());
        Ok(())
    }
}
