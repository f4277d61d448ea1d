//! Scheduling, dispatch, retries and cancellation end to end.

use chrono::{Duration, Utc};

use jobhub_core::error::ErrorKind;
use jobhub_core::types::PageRequest;
use jobhub_entity::execution::ExecutionStatus;
use jobhub_entity::job::{CircuitBreakerPolicy, RetryPolicy, RetryStrategy};

use crate::helpers::TestScheduler;

#[tokio::test]
async fn test_scheduled_job_runs_and_schedule_advances() {
    let scheduler = TestScheduler::new();
    let job = scheduler
        .active_job("nightly-sync", "flaky", 60, RetryPolicy::no_retry(), CircuitBreakerPolicy::disabled())
        .await;
    let now = Utc::now();
    let schedule = scheduler.schedule_due_at(&job, now - Duration::seconds(5)).await;

    let report = scheduler.orchestrator.tick_at(now).await;
    assert!(report.is_ok());
    assert_eq!(report.schedules_fired, 1);
    scheduler.orchestrator.wait_for_in_flight().await;

    let executions = scheduler.executions(&job).await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Succeeded);
    assert_eq!(executions[0].output, Some(serde_json::json!({"ok": true})));
    assert!(!executions[0].is_manual);

    let schedule = scheduler.schedule(&schedule).await;
    assert_eq!(schedule.last_execution, Some(now));
    let next = schedule.next_execution.expect("daily rule always has a next occurrence");
    assert!(next > now && next <= now + Duration::days(1));
}

#[tokio::test]
async fn test_manual_trigger_history_and_stats() {
    let scheduler = TestScheduler::new();
    let job = scheduler
        .active_job("rebuild", "flaky", 60, RetryPolicy::no_retry(), CircuitBreakerPolicy::disabled())
        .await;

    let first = scheduler.run_manually(&job).await;
    assert_eq!(first.status, ExecutionStatus::Succeeded);
    assert_eq!(first.triggered_by.as_deref(), Some("it"));
    scheduler.handler.fail();
    let second = scheduler.run_manually(&job).await;
    assert_eq!(second.status, ExecutionStatus::Failed);
    assert_eq!(second.error_message.as_deref(), Some("upstream returned 503"));

    let history = scheduler
        .queue
        .executions_for_job(&job.id, &PageRequest::default())
        .await
        .expect("history");
    assert_eq!(history.total_items, 2);
    assert_eq!(history.items[0].id, second.id);

    let stats = scheduler.queue.stats().await.expect("stats");
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.instance_id, "it-scheduler");
}

#[tokio::test]
async fn test_cancelled_execution_is_never_dispatched() {
    let scheduler = TestScheduler::new();
    let job = scheduler
        .active_job("export", "flaky", 60, RetryPolicy::no_retry(), CircuitBreakerPolicy::disabled())
        .await;
    let execution = scheduler.queue.trigger(&job.id, "it", None).await.expect("trigger");
    let cancelled = scheduler
        .queue
        .cancel(&execution.id, "operator changed their mind")
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

    assert_eq!(scheduler.orchestrator.tick().await.executions_dispatched, 0);
    scheduler.orchestrator.wait_for_in_flight().await;
    assert_eq!(scheduler.handler.runs(), 0);

    let err = scheduler
        .queue
        .cancel(&execution.id, "again")
        .await
        .expect_err("terminal execution cannot be cancelled");
    assert_eq!(err.kind, ErrorKind::InvalidTransition);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_execution_is_retried_with_backoff() {
    let scheduler = TestScheduler::new();
    let retry = RetryPolicy::new(2, RetryStrategy::Linear, 10).expect("valid policy");
    let job = scheduler
        .active_job("slow-report", "sleep", 1, retry, CircuitBreakerPolicy::disabled())
        .await;
    let execution = scheduler
        .queue
        .trigger(&job.id, "it", Some(serde_json::json!({"seconds": 30})))
        .await
        .expect("trigger");

    scheduler.orchestrator.tick().await;
    scheduler.orchestrator.wait_for_in_flight().await;

    let stored = scheduler.queue.execution(&execution.id).await.expect("exists");
    assert_eq!(stored.status, ExecutionStatus::Retrying);
    assert_eq!(stored.error_message.as_deref(), Some("Execution timed out"));
    assert_eq!(stored.retry_attempt, 1);
    assert_eq!(stored.retry_delay_seconds, Some(10));
    let retry_at = stored.next_retry_at.expect("retry scheduled");
    assert!(retry_at > Utc::now() + Duration::seconds(5));
}

#[tokio::test]
async fn test_trigger_requires_an_active_job() {
    let scheduler = TestScheduler::new();
    let job = scheduler
        .active_job("archived", "flaky", 60, RetryPolicy::no_retry(), CircuitBreakerPolicy::disabled())
        .await;
    let mut stored = scheduler.job(&job).await;
    stored.archive("it", Utc::now());
    scheduler.stores.jobs.update(&stored).await.expect("updated");

    let err = scheduler
        .queue
        .trigger(&job.id, "it", None)
        .await
        .expect_err("archived job cannot be triggered");
    assert_eq!(err.kind, ErrorKind::Conflict);
}
