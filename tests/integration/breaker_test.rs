//! Circuit breaker lifecycle across the orchestrator and the monitor.

use chrono::{Duration, Utc};

use jobhub_core::events::TransitionKind;
use jobhub_entity::circuit::CircuitBreakerState;
use jobhub_entity::execution::ExecutionStatus;
use jobhub_entity::job::{CircuitBreakerPolicy, JobStatus, RetryPolicy};

use crate::helpers::TestScheduler;

fn quick_policy() -> CircuitBreakerPolicy {
    CircuitBreakerPolicy::new(true, 3, 3, 600, true, 2).expect("valid policy")
}

#[tokio::test]
async fn test_breaker_opens_and_recovers_through_trial_run() {
    let mut scheduler = TestScheduler::new();
    let job = scheduler
        .active_job("ledger-import", "flaky", 60, RetryPolicy::no_retry(), quick_policy())
        .await;

    scheduler.handler.fail();
    for _ in 0..3 {
        let execution = scheduler.run_manually(&job).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
    }

    let opened_at = Utc::now();
    let report = scheduler.monitor.run_cycle_at(opened_at).await.expect("cycle");
    assert_eq!(report.transitions, vec![(job.id, TransitionKind::Opened)]);
    let disabled = scheduler.job(&job).await;
    assert_eq!(disabled.status, JobStatus::Disabled);
    assert_eq!(
        disabled.disabled_reason.as_deref(),
        Some("Circuit breaker opened due to 3 consecutive failures (threshold: 3)")
    );

    // Open breaker: the due schedule advances without firing.
    let schedule = scheduler.schedule_due_at(&job, opened_at).await;
    let report = scheduler.orchestrator.tick_at(opened_at + Duration::seconds(1)).await;
    assert_eq!(report.schedules_fired, 0);
    assert_eq!(scheduler.executions(&job).await.len(), 3);
    assert!(scheduler.schedule(&schedule).await.next_execution > Some(opened_at));

    let half_open_at = opened_at + Duration::seconds(601);
    let report = scheduler.monitor.run_cycle_at(half_open_at).await.expect("cycle");
    assert_eq!(report.transitions, vec![(job.id, TransitionKind::HalfOpened)]);

    // Half-open: the schedule fires a trial run even though the job is disabled.
    scheduler.handler.recover();
    let trial_at = half_open_at + Duration::seconds(9);
    scheduler.reschedule(&schedule, trial_at).await;
    let report = scheduler.orchestrator.tick_at(trial_at).await;
    assert_eq!(report.schedules_fired, 1);
    scheduler.orchestrator.wait_for_in_flight().await;
    let executions = scheduler.executions(&job).await;
    assert_eq!(executions[0].status, ExecutionStatus::Succeeded);

    let report = scheduler
        .monitor
        .run_cycle_at(trial_at + Duration::seconds(10))
        .await
        .expect("cycle");
    assert_eq!(report.transitions, vec![(job.id, TransitionKind::Closed)]);
    assert_eq!(scheduler.job(&job).await.status, JobStatus::Active);
    let status = scheduler.breakers.status(&job.id).await.expect("status");
    assert_eq!(status.breaker.state, CircuitBreakerState::Closed);
    assert_eq!(status.breaker.consecutive_failures, 0);

    assert_eq!(
        scheduler.drain_events(),
        vec![TransitionKind::Opened, TransitionKind::HalfOpened, TransitionKind::Closed]
    );
}

#[tokio::test]
async fn test_failed_trial_runs_reopen_the_breaker() {
    let scheduler = TestScheduler::new();
    let job = scheduler
        .active_job("fx-rates", "flaky", 60, RetryPolicy::no_retry(), quick_policy())
        .await;
    scheduler.handler.fail();
    for _ in 0..3 {
        scheduler.run_manually(&job).await;
    }
    let opened_at = Utc::now();
    scheduler.monitor.run_cycle_at(opened_at).await.expect("cycle");
    let half_open_at = opened_at + Duration::seconds(600);
    scheduler.monitor.run_cycle_at(half_open_at).await.expect("cycle");

    let schedule = scheduler.schedule_due_at(&job, half_open_at).await;
    let mut now = half_open_at;
    let mut reopened = false;
    for _ in 0..4 {
        now += Duration::seconds(5);
        scheduler.reschedule(&schedule, now).await;
        scheduler.orchestrator.tick_at(now).await;
        scheduler.orchestrator.wait_for_in_flight().await;
        let report = scheduler.monitor.run_cycle_at(now).await.expect("cycle");
        if report.transitions == vec![(job.id, TransitionKind::Reopened)] {
            reopened = true;
            break;
        }
    }
    assert!(reopened, "failing trial runs should reopen the breaker");

    let status = scheduler.breakers.status(&job.id).await.expect("status");
    assert_eq!(status.breaker.state, CircuitBreakerState::Open);
    assert_eq!(status.job_status, JobStatus::Disabled);
    assert_eq!(
        status.breaker.open_reason.as_deref(),
        Some("Circuit breaker reopened - job failed to recover after 2 attempts")
    );
}

#[tokio::test]
async fn test_operator_override_blocks_and_restores_firing() {
    let scheduler = TestScheduler::new();
    let job = scheduler
        .active_job("payroll", "flaky", 60, RetryPolicy::no_retry(), CircuitBreakerPolicy::disabled())
        .await;

    scheduler
        .breakers
        .force_open(&job.id, "vendor maintenance window", "ops")
        .await
        .expect("force open");
    assert_eq!(scheduler.job(&job).await.status, JobStatus::Disabled);

    let now = Utc::now();
    let schedule = scheduler.schedule_due_at(&job, now).await;
    assert_eq!(scheduler.orchestrator.tick_at(now).await.schedules_fired, 0);
    assert!(scheduler.executions(&job).await.is_empty());

    scheduler.breakers.force_close(&job.id, "ops").await.expect("force close");
    assert_eq!(scheduler.job(&job).await.status, JobStatus::Active);

    let later = now + Duration::seconds(30);
    scheduler.reschedule(&schedule, later).await;
    assert_eq!(scheduler.orchestrator.tick_at(later).await.schedules_fired, 1);
    scheduler.orchestrator.wait_for_in_flight().await;
    assert_eq!(scheduler.handler.runs(), 1);
}
