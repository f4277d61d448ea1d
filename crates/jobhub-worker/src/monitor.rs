//! Periodic circuit-breaker evaluation.
//!
//! Runs independently of the orchestrator. For every job with its breaker
//! enabled, the breaker's state decides what is examined:
//!
//! - **Closed**: the newest `window` executions; a run of failures at least
//!   `threshold` long opens the breaker and disables the job
//! - **Open**: once `open_duration` has elapsed (and auto-recovery is on),
//!   the breaker moves to half-open so trial runs can go ahead
//! - **HalfOpen**: executions since the breaker half-opened; a successful
//!   newest trial run closes it, running out of attempts re-opens it
//!
//! Every scheduler process may run a monitor, but only the holder of the
//! monitor lease evaluates a cycle, so half-open attempts are counted once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use jobhub_coord::DistributedLockService;
use jobhub_coord::keys::monitor_lock_key;
use jobhub_core::config::monitor::MonitorConfig;
use jobhub_core::error::AppError;
use jobhub_core::events::TransitionKind;
use jobhub_core::result::AppResult;
use jobhub_core::types::JobId;
use jobhub_database::Stores;
use jobhub_entity::circuit::{CircuitBreakerState, JobCircuitBreaker};
use jobhub_entity::execution::{ExecutionStatus, JobExecution};
use jobhub_entity::job::{CircuitBreakerPolicy, JobDefinition};

use crate::breaker::{CircuitBreakerService, reactivate};
use crate::task::PeriodicTask;

/// Actor recorded on transitions the monitor makes.
pub const MONITOR_ACTOR: &str = "CircuitBreakerMonitor";

/// Outcome of one monitor pass.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub jobs_checked: usize,
    pub transitions: Vec<(JobId, TransitionKind)>,
    /// Jobs whose evaluation failed.
    pub errors: usize,
    /// Another instance holds the monitor lease; nothing was evaluated.
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerMonitor {
    stores: Stores,
    breakers: CircuitBreakerService,
    locks: DistributedLockService,
    instance_id: String,
    config: MonitorConfig,
}

impl CircuitBreakerMonitor {
    pub fn new(
        stores: Stores,
        breakers: CircuitBreakerService,
        locks: DistributedLockService,
        instance_id: impl Into<String>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            stores,
            breakers,
            locks,
            instance_id: instance_id.into(),
            config,
        }
    }

    /// Take or renew the monitor lease.
    async fn lead(&self) -> AppResult<bool> {
        let key = monitor_lock_key();
        let ttl = Duration::from_secs(self.config.lease_seconds.max(1));
        if self.locks.try_acquire(key, &self.instance_id, ttl).await? {
            info!(instance_id = %self.instance_id, "Took the circuit breaker monitor lease");
            return Ok(true);
        }
        self.locks.extend(key, &self.instance_id, ttl).await
    }

    pub async fn run_cycle(&self) -> AppResult<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Evaluate every breaker-enabled job as of `now`. One job failing does
    /// not stop the others.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> AppResult<CycleReport> {
        if !self.lead().await? {
            debug!(instance_id = %self.instance_id, "Monitor lease held elsewhere; skipping cycle");
            return Ok(CycleReport {
                skipped: true,
                ..CycleReport::default()
            });
        }
        let jobs = self.stores.jobs.find_with_breaker_enabled().await?;
        let mut report = CycleReport {
            jobs_checked: jobs.len(),
            ..CycleReport::default()
        };
        for job in jobs {
            let job_id = job.id;
            let job_name = job.name.clone();
            match self.check_job(job, now).await {
                Ok(Some(kind)) => report.transitions.push((job_id, kind)),
                Ok(None) => {}
                Err(e) => {
                    error!(job_id = %job_id, job = %job_name, error = %e, "Circuit breaker check failed");
                    report.errors += 1;
                }
            }
        }
        debug!(
            jobs = report.jobs_checked,
            transitions = report.transitions.len(),
            errors = report.errors,
            "Circuit breaker cycle complete"
        );
        Ok(report)
    }

    async fn check_job(&self, job: JobDefinition, now: DateTime<Utc>) -> AppResult<Option<TransitionKind>> {
        let policy = job.circuit_breaker_policy;
        if !policy.enabled() {
            return Ok(None);
        }
        let breaker = self.stores.breakers.get_or_create(&job.id, now).await?;
        match breaker.state {
            CircuitBreakerState::Closed => self.check_closed(job, breaker, &policy, now).await,
            CircuitBreakerState::Open => self.check_open(job, breaker, &policy, now).await,
            CircuitBreakerState::HalfOpen => self.check_half_open(job, breaker, &policy, now).await,
        }
    }

    async fn check_closed(
        &self,
        mut job: JobDefinition,
        mut breaker: JobCircuitBreaker,
        policy: &CircuitBreakerPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<Option<TransitionKind>> {
        let window = usize::try_from(policy.consecutive_failures_window()).unwrap_or(usize::MAX);
        let recent = self.stores.executions.find_recent_by_job(&job.id, window).await?;
        if recent.len() < window {
            return Ok(None);
        }

        let (run, last_failure_at) = failure_run(&recent);
        let run = i32::try_from(run).unwrap_or(i32::MAX);
        let threshold = policy.failure_threshold();

        if i64::from(run) >= i64::from(threshold) {
            let reason = format!(
                "Circuit breaker opened due to {run} consecutive failures (threshold: {threshold})"
            );
            breaker.sync_failure_count(run, last_failure_at);
            breaker.open(&reason, MONITOR_ACTOR, now);
            job.disable(MONITOR_ACTOR, &reason, now);
            self.breakers
                .commit(TransitionKind::Opened, &breaker, &job, true, MONITOR_ACTOR, now)
                .await?;
            warn!(job_id = %job.id, job = %job.name, failures = run, threshold, "Circuit breaker opened");
            return Ok(Some(TransitionKind::Opened));
        }

        if breaker.consecutive_failures != run || breaker.last_failure_at != last_failure_at {
            breaker.sync_failure_count(run, last_failure_at);
            self.stores.breakers.save(&breaker).await?;
        }
        Ok(None)
    }

    async fn check_open(
        &self,
        job: JobDefinition,
        mut breaker: JobCircuitBreaker,
        policy: &CircuitBreakerPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<Option<TransitionKind>> {
        if !breaker.should_transition_to_half_open(policy, now) {
            return Ok(None);
        }
        breaker.move_to_half_open(now)?;
        self.breakers
            .commit(TransitionKind::HalfOpened, &breaker, &job, false, MONITOR_ACTOR, now)
            .await?;
        info!(job_id = %job.id, job = %job.name, "Circuit breaker half-open; probing for recovery");
        Ok(Some(TransitionKind::HalfOpened))
    }

    async fn check_half_open(
        &self,
        mut job: JobDefinition,
        mut breaker: JobCircuitBreaker,
        policy: &CircuitBreakerPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<Option<TransitionKind>> {
        let max_attempts = policy.half_open_max_attempts();
        let trials = self
            .stores
            .executions
            .find_by_job_since(
                &job.id,
                breaker.last_state_change_at,
                usize::try_from(max_attempts).unwrap_or(usize::MAX),
            )
            .await?;
        let Some(newest) = trials.first() else {
            return Ok(None);
        };

        if newest.status == ExecutionStatus::Succeeded {
            breaker.close(now);
            let job_changed = reactivate(&mut job, MONITOR_ACTOR, now);
            self.breakers
                .commit(TransitionKind::Closed, &breaker, &job, job_changed, MONITOR_ACTOR, now)
                .await?;
            info!(job_id = %job.id, job = %job.name, "Circuit breaker closed; job recovered");
            return Ok(Some(TransitionKind::Closed));
        }

        if breaker.has_exceeded_half_open_attempts(max_attempts) {
            let reason = format!(
                "Circuit breaker reopened - job failed to recover after {} attempts",
                breaker.half_open_attempts
            );
            breaker.open(&reason, MONITOR_ACTOR, now);
            job.disable(MONITOR_ACTOR, &reason, now);
            self.breakers
                .commit(TransitionKind::Reopened, &breaker, &job, true, MONITOR_ACTOR, now)
                .await?;
            warn!(job_id = %job.id, job = %job.name, "Circuit breaker reopened");
            return Ok(Some(TransitionKind::Reopened));
        }

        breaker.increment_half_open_attempts()?;
        self.stores.breakers.save(&breaker).await?;
        debug!(
            job_id = %job.id,
            attempts = breaker.half_open_attempts,
            max_attempts,
            "Half-open attempt counted"
        );
        Ok(None)
    }
}

/// Length of the failure run at the head of `newest_first`, and when the
/// newest of those failures happened.
///
/// Failed and timed-out executions count, a success ends the run, anything
/// else is passed over.
fn failure_run(newest_first: &[JobExecution]) -> (u32, Option<DateTime<Utc>>) {
    let mut run = 0u32;
    let mut last_failure_at = None;
    for execution in newest_first {
        match execution.status {
            ExecutionStatus::Succeeded => break,
            status if status.is_failure() => {
                run = run.saturating_add(1);
                if last_failure_at.is_none() {
                    last_failure_at = Some(execution.completed_at.unwrap_or(execution.queued_at));
                }
            }
            _ => {}
        }
    }
    (run, last_failure_at)
}

#[async_trait]
impl PeriodicTask for CircuitBreakerMonitor {
    fn name(&self) -> &str {
        "circuit-breaker-monitor"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds)
    }

    fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.config.error_backoff_seconds)
    }

    async fn run_once(&self) -> AppResult<()> {
        let report = self.run_cycle().await?;
        if report.errors > 0 {
            return Err(AppError::internal(format!(
                "{} of {} breaker checks failed",
                report.errors, report.jobs_checked
            )));
        }
        Ok(())
    }
}
