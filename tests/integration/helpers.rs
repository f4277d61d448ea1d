//! Shared test helpers for integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

use jobhub_coord::DistributedLockService;
use jobhub_coord::memory::MemoryLockStore;
use jobhub_core::config::{MonitorConfig, SchedulerConfig};
use jobhub_core::events::{TransitionEvent, TransitionKind};
use jobhub_database::{MemoryStore, Stores};
use jobhub_entity::execution::JobExecution;
use jobhub_entity::job::{CircuitBreakerPolicy, JobDefinition, NewJob, RetryPolicy};
use jobhub_entity::schedule::{JobSchedule, ScheduleRule};
use jobhub_worker::jobs::sleep::SleepHandler;
use jobhub_worker::notify::BroadcastNotifier;
use jobhub_worker::{
    CircuitBreakerMonitor, CircuitBreakerService, ExecutionQueue, JobExecutionError, JobExecutor,
    JobHandler, ScheduleResolver, SchedulerOrchestrator, SchedulerSignal,
};

/// Handler for job type `flaky`: fails until told to recover.
#[derive(Debug, Default)]
pub struct FlakyHandler {
    failing: AtomicBool,
    runs: AtomicUsize,
}

impl FlakyHandler {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    fn job_type(&self) -> &str {
        "flaky"
    }

    async fn execute(
        &self,
        _job: &JobDefinition,
        _execution: &JobExecution,
        _deadline: DateTime<Utc>,
    ) -> Result<Option<Value>, JobExecutionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(JobExecutionError::failed("upstream returned 503"))
        } else {
            Ok(Some(serde_json::json!({"ok": true})))
        }
    }
}

/// One scheduler instance wired against in-memory stores.
pub struct TestScheduler {
    pub stores: Stores,
    pub queue: ExecutionQueue,
    pub breakers: CircuitBreakerService,
    pub monitor: CircuitBreakerMonitor,
    pub orchestrator: SchedulerOrchestrator,
    pub handler: Arc<FlakyHandler>,
    pub events: broadcast::Receiver<TransitionEvent>,
}

impl TestScheduler {
    pub fn new() -> Self {
        let stores = Stores::memory(Arc::new(MemoryStore::new()));
        let locks = DistributedLockService::new(Arc::new(MemoryLockStore::new()));
        let signal = Arc::new(SchedulerSignal::new());

        let notifier = Arc::new(BroadcastNotifier::new(64));
        let events = notifier.subscribe();
        let breakers = CircuitBreakerService::new(stores.clone(), notifier);

        let handler = Arc::new(FlakyHandler::default());
        let mut executor = JobExecutor::new();
        executor.register(handler.clone());
        executor.register(Arc::new(SleepHandler));

        let config = SchedulerConfig {
            instance_id: "it-scheduler".to_string(),
            ..SchedulerConfig::default()
        };
        let orchestrator = SchedulerOrchestrator::new(
            stores.clone(),
            locks.clone(),
            Arc::new(ScheduleResolver::new()),
            Arc::new(executor),
            signal.clone(),
            config,
        );

        Self {
            queue: ExecutionQueue::new(stores.clone(), signal, "it-scheduler"),
            monitor: CircuitBreakerMonitor::new(
                stores.clone(),
                breakers.clone(),
                locks,
                "it-scheduler",
                MonitorConfig::default(),
            ),
            stores,
            breakers,
            orchestrator,
            handler,
            events,
        }
    }

    /// Register and activate a job.
    pub async fn active_job(
        &self,
        name: &str,
        job_type: &str,
        timeout_seconds: i32,
        retry: RetryPolicy,
        breaker: CircuitBreakerPolicy,
    ) -> JobDefinition {
        let mut new = NewJob::new(name, job_type, timeout_seconds, "it");
        new.retry_policy = retry;
        new.circuit_breaker_policy = breaker;
        let mut job = JobDefinition::new(new, Utc::now()).expect("valid job");
        job.activate("it", Utc::now());
        self.stores.jobs.create(&job).await.expect("job stored")
    }

    /// A daily schedule whose next occurrence is `due_at`.
    pub async fn schedule_due_at(&self, job: &JobDefinition, due_at: DateTime<Utc>) -> JobSchedule {
        let rule = ScheduleRule::daily(NaiveTime::from_hms_opt(2, 30, 0).expect("valid time"));
        let mut schedule =
            JobSchedule::new(job.id, rule, "it", None, None, Utc::now()).expect("valid schedule");
        schedule.set_next_execution(Some(due_at));
        self.stores.schedules.create(&schedule).await.expect("schedule stored")
    }

    /// Move an existing schedule's next occurrence.
    pub async fn reschedule(&self, schedule: &JobSchedule, due_at: DateTime<Utc>) {
        let mut schedule = self.schedule(schedule).await;
        schedule.set_next_execution(Some(due_at));
        self.stores.schedules.update(&schedule).await.expect("schedule updated");
    }

    pub async fn schedule(&self, schedule: &JobSchedule) -> JobSchedule {
        self.stores
            .schedules
            .find_by_id(&schedule.id)
            .await
            .expect("query")
            .expect("schedule exists")
    }

    pub async fn job(&self, job: &JobDefinition) -> JobDefinition {
        self.stores.jobs.find_by_id(&job.id).await.expect("query").expect("job exists")
    }

    pub async fn executions(&self, job: &JobDefinition) -> Vec<JobExecution> {
        self.stores
            .executions
            .find_recent_by_job(&job.id, 100)
            .await
            .expect("query")
    }

    /// Trigger a manual run and let the orchestrator finish it.
    pub async fn run_manually(&self, job: &JobDefinition) -> JobExecution {
        let execution = self.queue.trigger(&job.id, "it", None).await.expect("trigger");
        self.orchestrator.tick().await;
        self.orchestrator.wait_for_in_flight().await;
        self.queue.execution(&execution.id).await.expect("execution exists")
    }

    /// Transition kinds published so far.
    pub fn drain_events(&mut self) -> Vec<TransitionKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }
}
