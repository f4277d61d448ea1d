//! Operator access to circuit breakers, and the shared commit path for
//! breaker transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use jobhub_core::error::AppError;
use jobhub_core::events::{TransitionEvent, TransitionKind};
use jobhub_core::result::AppResult;
use jobhub_core::traits::notifier::TransitionNotifier;
use jobhub_core::types::JobId;
use jobhub_database::Stores;
use jobhub_entity::circuit::{CircuitBreakerState, JobCircuitBreaker};
use jobhub_entity::job::{CircuitBreakerPolicy, JobDefinition, JobStatus};

use crate::notify::publish_transition;

/// Breaker state of one job together with the job's own status.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub job_id: JobId,
    pub job_name: String,
    pub job_status: JobStatus,
    pub policy: CircuitBreakerPolicy,
    pub breaker: JobCircuitBreaker,
}

#[derive(Clone)]
pub struct CircuitBreakerService {
    stores: Stores,
    notifier: Arc<dyn TransitionNotifier>,
}

impl CircuitBreakerService {
    pub fn new(stores: Stores, notifier: Arc<dyn TransitionNotifier>) -> Self {
        Self { stores, notifier }
    }

    pub async fn status(&self, job_id: &JobId) -> AppResult<BreakerStatus> {
        let job = self.load_job(job_id).await?;
        let breaker = self.stores.breakers.get_or_create(job_id, Utc::now()).await?;
        Ok(BreakerStatus {
            job_id: job.id,
            job_name: job.name,
            job_status: job.status,
            policy: job.circuit_breaker_policy,
            breaker,
        })
    }

    /// Open the breaker and disable the job. No-op when already open.
    pub async fn force_open(
        &self,
        job_id: &JobId,
        reason: &str,
        actor: &str,
    ) -> AppResult<JobCircuitBreaker> {
        if reason.trim().is_empty() {
            return Err(AppError::validation("A reason is required to open a circuit breaker"));
        }
        let mut job = self.load_job(job_id).await?;
        let now = Utc::now();
        let mut breaker = self.stores.breakers.get_or_create(job_id, now).await?;
        if !breaker.open(reason, actor, now) {
            info!(job = %job.name, "Circuit breaker already open");
            return Ok(breaker);
        }
        job.disable(actor, reason, now);
        self.commit(TransitionKind::Opened, &breaker, &job, true, actor, now).await?;
        warn!(job = %job.name, actor = %actor, reason = %reason, "Circuit breaker manually opened");
        Ok(breaker)
    }

    /// Close the breaker from any state and reactivate a disabled job.
    pub async fn force_close(&self, job_id: &JobId, actor: &str) -> AppResult<JobCircuitBreaker> {
        let mut job = self.load_job(job_id).await?;
        let now = Utc::now();
        let mut breaker = self.stores.breakers.get_or_create(job_id, now).await?;
        let previous = breaker.state;
        breaker.close(now);
        let job_changed = reactivate(&mut job, actor, now);
        self.stores
            .breakers
            .save_transition(&breaker, job_changed.then_some(&job))
            .await?;
        if previous != CircuitBreakerState::Closed {
            self.emit(TransitionKind::Closed, &breaker, &job, actor, now).await;
        }
        info!(job = %job.name, actor = %actor, previous = %previous, "Circuit breaker manually closed");
        Ok(breaker)
    }

    /// Persist a transition (with the job when it changed) and notify.
    pub(crate) async fn commit(
        &self,
        kind: TransitionKind,
        breaker: &JobCircuitBreaker,
        job: &JobDefinition,
        job_changed: bool,
        actor: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.stores
            .breakers
            .save_transition(breaker, job_changed.then_some(job))
            .await?;
        self.emit(kind, breaker, job, actor, now).await;
        Ok(())
    }

    async fn emit(
        &self,
        kind: TransitionKind,
        breaker: &JobCircuitBreaker,
        job: &JobDefinition,
        actor: &str,
        now: DateTime<Utc>,
    ) {
        let event = TransitionEvent::new(
            kind,
            job.id,
            job.name.clone(),
            breaker.id,
            breaker.open_reason.clone(),
            breaker.consecutive_failures,
            breaker.half_open_attempts,
            actor,
            now,
        );
        publish_transition(self.notifier.as_ref(), event).await;
    }

    async fn load_job(&self, job_id: &JobId) -> AppResult<JobDefinition> {
        self.stores
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {job_id} not found")))
    }
}

/// Reactivate a job the breaker disabled. Draft and archived jobs stay as they are.
pub(crate) fn reactivate(job: &mut JobDefinition, actor: &str, now: DateTime<Utc>) -> bool {
    if job.status != JobStatus::Disabled {
        return false;
    }
    job.activate(actor, now);
    true
}

impl std::fmt::Debug for CircuitBreakerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerService")
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}
