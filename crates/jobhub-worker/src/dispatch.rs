//! Hand-off of queued and retrying executions to the executor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use jobhub_coord::DistributedLockService;
use jobhub_coord::keys::execution_lock_key;
use jobhub_core::result::AppResult;
use jobhub_core::types::ExecutionId;
use jobhub_database::Stores;
use jobhub_entity::circuit::CircuitBreakerState;
use jobhub_entity::execution::{ExecutionStatus, JobExecution};
use jobhub_entity::job::{JobDefinition, JobStatus};

use crate::executor::{ExecutionOutcome, JobExecutor};

/// Active jobs run. A disabled job runs only while its breaker is half-open,
/// so recovery trial runs can execute.
pub(crate) async fn is_runnable(stores: &Stores, job: &JobDefinition) -> AppResult<bool> {
    match job.status {
        JobStatus::Active => Ok(true),
        JobStatus::Disabled if job.circuit_breaker_policy.enabled() => Ok(stores
            .breakers
            .find_by_job(&job.id)
            .await?
            .is_some_and(|b| b.state == CircuitBreakerState::HalfOpen)),
        _ => Ok(false),
    }
}

/// Statuses an execution can be handed off from.
const STARTABLE: [ExecutionStatus; 2] = [ExecutionStatus::Queued, ExecutionStatus::Retrying];

fn limit_of(job: &JobDefinition) -> u64 {
    u64::try_from(job.max_concurrent_executions).unwrap_or(1)
}

/// Releases an execution lease once the hand-off ends, on every path.
struct LeaseGuard {
    locks: DistributedLockService,
    tracker: TaskTracker,
    key: String,
    owner: String,
    released: bool,
}

impl LeaseGuard {
    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.locks.release(&self.key, &self.owner).await {
            warn!(key = %self.key, error = %e, "Failed to release execution lock");
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        // Without a runtime the lease simply expires.
        if self.released || tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let (locks, key, owner) = (self.locks.clone(), self.key.clone(), self.owner.clone());
        self.tracker.spawn(async move {
            if let Err(e) = locks.release(&key, &owner).await {
                warn!(key = %key, error = %e, "Failed to release execution lock after abort");
            }
        });
    }
}

/// Locks an execution, then runs it on a tracked task.
#[derive(Debug, Clone)]
pub struct ExecutionDispatcher {
    stores: Stores,
    locks: DistributedLockService,
    executor: Arc<JobExecutor>,
    instance_id: String,
    lock_ttl: Duration,
}

impl ExecutionDispatcher {
    pub fn new(
        stores: Stores,
        locks: DistributedLockService,
        executor: Arc<JobExecutor>,
        instance_id: impl Into<String>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            stores,
            locks,
            executor,
            instance_id: instance_id.into(),
            lock_ttl,
        }
    }

    /// Take `execution:{id}` and spawn the hand-off. `false` when another
    /// owner holds the lock.
    pub async fn dispatch(&self, tracker: &TaskTracker, execution_id: ExecutionId) -> AppResult<bool> {
        let key = execution_lock_key(execution_id);
        if !self.locks.try_acquire(&key, &self.instance_id, self.lock_ttl).await? {
            debug!(execution_id = %execution_id, "Execution lock held elsewhere");
            return Ok(false);
        }
        let guard = LeaseGuard {
            locks: self.locks.clone(),
            tracker: tracker.clone(),
            key,
            owner: self.instance_id.clone(),
            released: false,
        };
        let this = self.clone();
        tracker.spawn(async move {
            if let Err(e) = this.run_execution(execution_id).await {
                error!(execution_id = %execution_id, error = %e, "Execution hand-off failed");
            }
            guard.release().await;
        });
        Ok(true)
    }

    /// Start and run one execution, then record its outcome and any retry.
    ///
    /// Returns the stored execution, or `None` when it was not picked up
    /// (already taken, job at capacity, or vanished).
    pub async fn run_execution(&self, execution_id: ExecutionId) -> AppResult<Option<JobExecution>> {
        let executions = &self.stores.executions;
        let Some(mut execution) = executions.find_by_id(&execution_id).await? else {
            warn!(execution_id = %execution_id, "Execution disappeared before hand-off");
            return Ok(None);
        };
        if !STARTABLE.contains(&execution.status) {
            debug!(execution_id = %execution_id, status = %execution.status, "Execution already handled");
            return Ok(None);
        }

        let Some(job) = self.stores.jobs.find_by_id(&execution.job_id).await? else {
            execution.skip("job no longer exists", Utc::now())?;
            return executions.update_from(&execution, &STARTABLE).await;
        };

        if !is_runnable(&self.stores, &job).await? {
            info!(
                execution_id = %execution_id,
                job = %job.name,
                status = %job.status,
                "Skipping execution of non-runnable job"
            );
            execution.skip(&format!("job is {}", job.status), Utc::now())?;
            return executions.update_from(&execution, &STARTABLE).await;
        }

        execution.start(Utc::now())?;
        execution.host_instance = Some(self.instance_id.clone());
        let Some(execution) = executions.try_start(&execution, limit_of(&job)).await? else {
            debug!(
                execution_id = %execution_id,
                job = %job.name,
                limit = job.max_concurrent_executions,
                "Job at concurrency limit or execution claimed; leaving it for a later tick"
            );
            return Ok(None);
        };

        let outcome = self.executor.run(&job, &execution).await;
        self.record_outcome(&job, execution, outcome).await
    }

    async fn record_outcome(
        &self,
        job: &JobDefinition,
        mut execution: JobExecution,
        outcome: ExecutionOutcome,
    ) -> AppResult<Option<JobExecution>> {
        let execution_id = execution.id;
        let now = Utc::now();
        match outcome {
            ExecutionOutcome::Succeeded(output) => {
                execution.complete(output, now)?;
                info!(
                    execution_id = %execution_id,
                    job = %job.name,
                    duration_seconds = execution.duration_seconds,
                    "Execution succeeded"
                );
            }
            ExecutionOutcome::Failed { message, stack_trace } => {
                execution.fail(&message, stack_trace, now)?;
                warn!(execution_id = %execution_id, job = %job.name, error = %message, "Execution failed");
                schedule_retry(job, &mut execution, now)?;
            }
            ExecutionOutcome::TimedOut => {
                execution.timeout(now)?;
                warn!(
                    execution_id = %execution_id,
                    job = %job.name,
                    timeout_seconds = job.timeout_seconds,
                    "Execution timed out"
                );
                schedule_retry(job, &mut execution, now)?;
            }
        }

        let executions = &self.stores.executions;
        if let Some(stored) = executions.update_from(&execution, &[ExecutionStatus::Running]).await? {
            return Ok(Some(stored));
        }
        let current = executions.find_by_id(&execution_id).await?;
        info!(
            execution_id = %execution_id,
            status = ?current.as_ref().map(|e| e.status),
            "Execution changed while running; discarding outcome"
        );
        Ok(current)
    }

    /// Time out running executions whose deadline has passed and whose lease
    /// nobody holds, such as those left behind by a crashed instance.
    ///
    /// Reclaimed executions go through the job's retry policy.
    pub async fn reclaim_stale(&self, now: DateTime<Utc>, limit: usize) -> AppResult<usize> {
        let running = self
            .stores
            .executions
            .find_by_status(ExecutionStatus::Running, limit)
            .await?;
        let mut reclaimed = 0;
        for mut execution in running {
            let Some(started_at) = execution.started_at else {
                continue;
            };
            let Some(job) = self.stores.jobs.find_by_id(&execution.job_id).await? else {
                continue;
            };
            let deadline = chrono::Duration::from_std(job.timeout())
                .ok()
                .and_then(|d| started_at.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if deadline > now {
                continue;
            }
            if self.locks.is_locked(&execution_lock_key(execution.id)).await? {
                continue;
            }

            execution.timeout(now)?;
            schedule_retry(&job, &mut execution, now)?;
            if self
                .stores
                .executions
                .update_from(&execution, &[ExecutionStatus::Running])
                .await?
                .is_some()
            {
                warn!(
                    execution_id = %execution.id,
                    job = %job.name,
                    host_instance = ?execution.host_instance,
                    status = %execution.status,
                    "Reclaimed abandoned execution"
                );
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

fn schedule_retry(
    job: &JobDefinition,
    execution: &mut JobExecution,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if !execution.can_retry() {
        return Ok(());
    }
    let attempt = u32::try_from(execution.retry_attempt).unwrap_or(0).saturating_add(1);
    let delay = job.retry_policy.delay(attempt);
    let next_at = chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let delay_seconds = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);
    execution.schedule_retry(next_at, delay_seconds)?;
    info!(
        execution_id = %execution.id,
        attempt = execution.retry_attempt,
        max_attempts = execution.max_retry_attempts,
        delay_seconds,
        "Scheduled retry"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use jobhub_coord::memory::MemoryLockStore;
    use jobhub_database::MemoryStore;
    use jobhub_entity::job::{NewJob, RetryPolicy, RetryStrategy};
    use serde_json::Value;

    use super::*;
    use crate::executor::{JobExecutionError, JobHandler};

    /// Tracks how many runs overlap.
    #[derive(Debug, Default)]
    struct Overlap {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Overlap {
        fn job_type(&self) -> &str {
            "overlap"
        }

        async fn execute(
            &self,
            _job: &JobDefinition,
            _execution: &JobExecution,
            _deadline: DateTime<Utc>,
        ) -> Result<Option<Value>, JobExecutionError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[derive(Debug)]
    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        fn job_type(&self) -> &str {
            "panic"
        }

        async fn execute(
            &self,
            _job: &JobDefinition,
            _execution: &JobExecution,
            _deadline: DateTime<Utc>,
        ) -> Result<Option<Value>, JobExecutionError> {
            panic!("handler bug")
        }
    }

    /// Cancels its own execution through the store before returning.
    #[derive(Debug)]
    struct SelfCancelling {
        stores: Stores,
    }

    #[async_trait]
    impl JobHandler for SelfCancelling {
        fn job_type(&self) -> &str {
            "self-cancel"
        }

        async fn execute(
            &self,
            _job: &JobDefinition,
            execution: &JobExecution,
            _deadline: DateTime<Utc>,
        ) -> Result<Option<Value>, JobExecutionError> {
            let mut current = self
                .stores
                .executions
                .find_by_id(&execution.id)
                .await?
                .ok_or_else(|| JobExecutionError::failed("missing"))?;
            current.cancel("operator", Utc::now())?;
            self.stores.executions.update(&current).await?;
            Err(JobExecutionError::failed("interrupted"))
        }
    }

    struct Fixture {
        stores: Stores,
        locks: DistributedLockService,
        dispatcher: ExecutionDispatcher,
        overlap: Arc<Overlap>,
    }

    fn fixture() -> Fixture {
        let stores = Stores::memory(Arc::new(MemoryStore::new()));
        let locks = DistributedLockService::new(Arc::new(MemoryLockStore::new()));
        let overlap = Arc::new(Overlap::default());
        let mut executor = JobExecutor::new();
        executor.register(overlap.clone());
        executor.register(Arc::new(Panicking));
        executor.register(Arc::new(SelfCancelling {
            stores: stores.clone(),
        }));
        let dispatcher = ExecutionDispatcher::new(
            stores.clone(),
            locks.clone(),
            Arc::new(executor),
            "dispatch-test",
            Duration::from_secs(300),
        );
        Fixture {
            stores,
            locks,
            dispatcher,
            overlap,
        }
    }

    async fn active_job(stores: &Stores, job_type: &str, retry: RetryPolicy) -> JobDefinition {
        let mut new = NewJob::new(format!("{job_type}-job"), job_type, 30, "tests");
        new.retry_policy = retry;
        let mut job = JobDefinition::new(new, Utc::now()).expect("valid job");
        job.activate("tests", Utc::now());
        stores.jobs.create(&job).await.expect("job stored")
    }

    async fn queued(stores: &Stores, job: &JobDefinition) -> JobExecution {
        let execution = JobExecution::manual(job.id, "tests", None, job.retry_policy.max_retries(), Utc::now());
        stores.executions.create(&execution).await.expect("stored")
    }

    async fn stored(stores: &Stores, id: ExecutionId) -> JobExecution {
        stores.executions.find_by_id(&id).await.expect("query").expect("exists")
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_handoffs_respect_concurrency_limit() {
        let f = fixture();
        let job = active_job(&f.stores, "overlap", RetryPolicy::no_retry()).await;
        assert_eq!(job.max_concurrent_executions, 1);
        let a = queued(&f.stores, &job).await;
        let b = queued(&f.stores, &job).await;
        let c = queued(&f.stores, &job).await;

        let (ra, rb, rc) = tokio::join!(
            f.dispatcher.run_execution(a.id),
            f.dispatcher.run_execution(b.id),
            f.dispatcher.run_execution(c.id),
        );
        let ran = [ra, rb, rc]
            .into_iter()
            .map(|r| r.expect("hand-off"))
            .filter(Option::is_some)
            .count();

        assert_eq!(ran, 1);
        assert_eq!(f.overlap.peak.load(Ordering::SeqCst), 1);
        let mut statuses = Vec::new();
        for id in [a.id, b.id, c.id] {
            statuses.push(stored(&f.stores, id).await.status);
        }
        assert_eq!(statuses.iter().filter(|s| **s == ExecutionStatus::Succeeded).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == ExecutionStatus::Queued).count(), 2);
    }

    #[tokio::test]
    async fn test_handler_panic_fails_execution_and_frees_the_slot() {
        let f = fixture();
        let job = active_job(&f.stores, "panic", RetryPolicy::no_retry()).await;
        let execution = queued(&f.stores, &job).await;
        let tracker = TaskTracker::new();

        assert!(f.dispatcher.dispatch(&tracker, execution.id).await.expect("dispatch"));
        tracker.close();
        tracker.wait().await;

        let after = stored(&f.stores, execution.id).await;
        assert_eq!(after.status, ExecutionStatus::Failed);
        assert_eq!(after.error_message.as_deref(), Some("Handler panicked: handler bug"));
        assert_eq!(f.stores.executions.count_active(&job.id).await.expect("count"), 0);
        let key = execution_lock_key(execution.id);
        assert!(!f.locks.is_locked(&key).await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_outcome_does_not_overwrite_cancellation() {
        let f = fixture();
        let retry = RetryPolicy::new(2, RetryStrategy::Linear, 5).expect("valid policy");
        let job = active_job(&f.stores, "self-cancel", retry).await;
        let execution = queued(&f.stores, &job).await;

        let result = f.dispatcher.run_execution(execution.id).await.expect("hand-off");
        assert_eq!(result.map(|e| e.status), Some(ExecutionStatus::Cancelled));
        let after = stored(&f.stores, execution.id).await;
        assert_eq!(after.status, ExecutionStatus::Cancelled);
        assert_eq!(after.retry_attempt, 0);
    }

    #[tokio::test]
    async fn test_reclaims_abandoned_running_execution() {
        let f = fixture();
        let retry = RetryPolicy::new(1, RetryStrategy::Linear, 10).expect("valid policy");
        let job = active_job(&f.stores, "overlap", retry).await;
        let now = Utc::now();

        let mut abandoned = JobExecution::manual(job.id, "tests", None, 1, now);
        abandoned.start(now - chrono::Duration::minutes(5)).expect("start");
        abandoned.host_instance = Some("crashed-instance".into());
        f.stores.executions.create(&abandoned).await.expect("stored");

        let mut leased = JobExecution::manual(job.id, "tests", None, 1, now);
        leased.start(now - chrono::Duration::minutes(5)).expect("start");
        f.stores.executions.create(&leased).await.expect("stored");
        let key = execution_lock_key(leased.id);
        assert!(f.locks.try_acquire(&key, "live-instance", Duration::from_secs(60)).await.expect("acquire"));

        let mut fresh = JobExecution::manual(job.id, "tests", None, 1, now);
        fresh.start(now).expect("start");
        f.stores.executions.create(&fresh).await.expect("stored");

        assert_eq!(f.dispatcher.reclaim_stale(now, 10).await.expect("sweep"), 1);

        let reclaimed = stored(&f.stores, abandoned.id).await;
        assert_eq!(reclaimed.status, ExecutionStatus::Retrying);
        assert_eq!(reclaimed.error_message.as_deref(), Some("Execution timed out"));
        assert_eq!(reclaimed.retry_delay_seconds, Some(10));
        assert_eq!(stored(&f.stores, leased.id).await.status, ExecutionStatus::Running);
        assert_eq!(stored(&f.stores, fresh.id).await.status, ExecutionStatus::Running);
    }
}
