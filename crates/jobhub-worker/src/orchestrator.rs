//! The scheduler loop.
//!
//! Each tick runs four isolated phases: fire due schedules, dispatch queued
//! executions, dispatch retries whose delay has elapsed, and reclaim running
//! executions abandoned past their deadline. A failing phase is logged and
//! never stops the others.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use jobhub_coord::DistributedLockService;
use jobhub_coord::keys::schedule_lock_key;
use jobhub_core::config::scheduler::SchedulerConfig;
use jobhub_core::result::AppResult;
use jobhub_core::types::ScheduleId;
use jobhub_database::Stores;
use jobhub_entity::execution::{ExecutionStatus, JobExecution};
use jobhub_entity::schedule::JobSchedule;

use crate::dispatch::{ExecutionDispatcher, is_runnable};
use crate::executor::JobExecutor;
use crate::resolver::ScheduleResolver;
use crate::signal::SchedulerSignal;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub schedules_fired: usize,
    pub executions_dispatched: usize,
    pub retries_dispatched: usize,
    pub executions_reclaimed: usize,
    /// Phases that failed outright.
    pub failed_phases: Vec<&'static str>,
}

impl TickReport {
    pub fn is_ok(&self) -> bool {
        self.failed_phases.is_empty()
    }
}

/// One per process. Cooperates with other instances through the lock service.
#[derive(Debug)]
pub struct SchedulerOrchestrator {
    stores: Stores,
    locks: DistributedLockService,
    resolver: Arc<ScheduleResolver>,
    dispatcher: ExecutionDispatcher,
    signal: Arc<SchedulerSignal>,
    config: SchedulerConfig,
    instance_id: String,
    tracker: TaskTracker,
}

impl SchedulerOrchestrator {
    pub fn new(
        stores: Stores,
        locks: DistributedLockService,
        resolver: Arc<ScheduleResolver>,
        executor: Arc<JobExecutor>,
        signal: Arc<SchedulerSignal>,
        config: SchedulerConfig,
    ) -> Self {
        let instance_id = config.resolve_instance_id();
        let dispatcher = ExecutionDispatcher::new(
            stores.clone(),
            locks.clone(),
            executor,
            instance_id.clone(),
            Duration::from_secs(config.execution_lock_seconds),
        );
        Self {
            stores,
            locks,
            resolver,
            dispatcher,
            signal,
            config,
            instance_id,
            tracker: TaskTracker::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Executions currently being handed off or run by this instance.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every spawned hand-off has finished.
    pub async fn wait_for_in_flight(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Run until `cancel` turns `true`.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        let tick = Duration::from_secs(self.config.tick_interval_seconds);
        let backoff = Duration::from_secs(self.config.error_backoff_seconds);
        info!(
            instance_id = %self.instance_id,
            tick_seconds = tick.as_secs(),
            single_instance = self.locks.is_single_instance(),
            "Scheduler orchestrator started"
        );

        loop {
            if *cancel.borrow() {
                break;
            }
            let report = self.tick().await;

            if report.is_ok() {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    woken = self.signal.wait_for_signal(tick) => {
                        if woken {
                            debug!("Orchestrator woken early");
                        }
                    }
                }
            } else {
                warn!(
                    failed_phases = ?report.failed_phases,
                    backoff_seconds = backoff.as_secs(),
                    "Tick failed; backing off"
                );
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        info!(in_flight = self.tracker.len(), "Scheduler orchestrator stopping");
        self.tracker.close();
        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.tracker.len(),
                "Shutdown grace period elapsed; abandoning in-flight executions"
            );
        }
        info!("Scheduler orchestrator stopped");
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// One pass over every phase as of `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        match self.fire_due_schedules(now).await {
            Ok(n) => report.schedules_fired = n,
            Err(e) => {
                error!(error = %e, "Due-schedule phase failed");
                report.failed_phases.push("schedules");
            }
        }
        match self.dispatch_queued().await {
            Ok(n) => report.executions_dispatched = n,
            Err(e) => {
                error!(error = %e, "Queued-execution phase failed");
                report.failed_phases.push("queued");
            }
        }
        match self.dispatch_retries(now).await {
            Ok(n) => report.retries_dispatched = n,
            Err(e) => {
                error!(error = %e, "Retry phase failed");
                report.failed_phases.push("retries");
            }
        }
        match self.dispatcher.reclaim_stale(now, self.config.queued_batch_size).await {
            Ok(n) => report.executions_reclaimed = n,
            Err(e) => {
                error!(error = %e, "Stale-execution phase failed");
                report.failed_phases.push("stale");
            }
        }

        debug!(?report, "Tick complete");
        report
    }

    async fn fire_due_schedules(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let due = self.stores.schedules.find_due(now).await?;
        let mut fired = 0;
        for schedule in due {
            match self.fire_schedule(schedule.id, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(schedule_id = %schedule.id, error = %e, "Failed to process due schedule");
                }
            }
        }
        Ok(fired)
    }

    async fn fire_schedule(&self, schedule_id: ScheduleId, now: DateTime<Utc>) -> AppResult<bool> {
        let key = schedule_lock_key(schedule_id);
        let ttl = Duration::from_secs(self.config.schedule_lock_seconds);
        if !self.locks.try_acquire(&key, &self.instance_id, ttl).await? {
            debug!(schedule_id = %schedule_id, "Schedule lock held elsewhere");
            return Ok(false);
        }
        let result = self.fire_locked(schedule_id, now).await;
        if let Err(e) = self.locks.release(&key, &self.instance_id).await {
            warn!(key = %key, error = %e, "Failed to release schedule lock");
        }
        result
    }

    async fn fire_locked(&self, schedule_id: ScheduleId, now: DateTime<Utc>) -> AppResult<bool> {
        let Some(mut schedule) = self.stores.schedules.find_by_id(&schedule_id).await? else {
            return Ok(false);
        };
        if !schedule.is_due(now) {
            debug!(schedule_id = %schedule_id, "Schedule no longer due");
            return Ok(false);
        }
        let Some(job) = self.stores.jobs.find_by_id(&schedule.job_id).await? else {
            warn!(schedule_id = %schedule_id, job_id = %schedule.job_id, "Schedule references a missing job");
            return Ok(false);
        };

        if !is_runnable(&self.stores, &job).await? {
            info!(
                schedule_id = %schedule_id,
                job = %job.name,
                status = %job.status,
                "Job not runnable; advancing schedule without firing"
            );
            self.advance(&mut schedule, now).await?;
            return Ok(false);
        }

        let limit = u64::try_from(job.max_concurrent_executions).unwrap_or(1);
        let execution = JobExecution::scheduled(job.id, schedule.id, job.retry_policy.max_retries(), now)
            .on_host(&self.instance_id);
        let Some(execution) = self.stores.executions.create_within_limit(&execution, limit).await? else {
            warn!(
                schedule_id = %schedule_id,
                job = %job.name,
                limit,
                "Job at concurrency limit; deferring this firing"
            );
            return Ok(false);
        };

        schedule.record_execution(now);
        self.advance(&mut schedule, now).await?;

        info!(
            schedule_id = %schedule_id,
            execution_id = %execution.id,
            job = %job.name,
            next_execution = ?schedule.next_execution,
            "Queued scheduled execution"
        );
        self.signal.notify_executions_changed();
        Ok(true)
    }

    /// Recompute `next_execution` and persist the schedule.
    async fn advance(&self, schedule: &mut JobSchedule, now: DateTime<Utc>) -> AppResult<()> {
        let next = match self.resolver.next_for_schedule(schedule, now) {
            Ok(next) => next,
            Err(e) => {
                error!(
                    schedule_id = %schedule.id,
                    error = %e,
                    "Cannot compute next occurrence; schedule stops firing"
                );
                None
            }
        };
        schedule.set_next_execution(next);
        self.stores.schedules.update(schedule).await?;
        Ok(())
    }

    async fn dispatch_queued(&self) -> AppResult<usize> {
        let queued = self
            .stores
            .executions
            .find_by_status(ExecutionStatus::Queued, self.config.queued_batch_size)
            .await?;
        Ok(self.dispatch_all(queued).await)
    }

    async fn dispatch_retries(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let due = self
            .stores
            .executions
            .find_retries_due(now, self.config.queued_batch_size)
            .await?;
        Ok(self.dispatch_all(due).await)
    }

    async fn dispatch_all(&self, executions: Vec<JobExecution>) -> usize {
        let mut dispatched = 0;
        for execution in executions {
            match self.dispatcher.dispatch(&self.tracker, execution.id).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(execution_id = %execution.id, error = %e, "Failed to dispatch execution");
                }
            }
        }
        dispatched
    }
}
