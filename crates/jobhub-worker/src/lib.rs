//! Scheduling engine for JobHub.
//!
//! This crate provides:
//! - A schedule resolver computing the next occurrence of every rule type
//! - The orchestrator loop: fire due schedules, dispatch queued executions and retries
//! - A job executor registry that runs handlers under a deadline
//! - The circuit-breaker monitor and the operator-facing breaker service
//! - Manual trigger, cancellation and inspection of executions
//! - A coalescing wake signal, a small periodic-task runner and the lease janitor

pub mod breaker;
pub mod dispatch;
pub mod executor;
pub mod jobs;
pub mod monitor;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod resolver;
pub mod signal;
pub mod task;

pub use breaker::{BreakerStatus, CircuitBreakerService};
pub use executor::{ExecutionOutcome, JobExecutionError, JobExecutor, JobHandler};
pub use monitor::CircuitBreakerMonitor;
pub use orchestrator::{SchedulerOrchestrator, TickReport};
pub use queue::{ExecutionQueue, QueueStats};
pub use resolver::{ConditionEvaluator, ScheduleResolver};
pub use signal::SchedulerSignal;
pub use task::{LeaseJanitor, PeriodicTask};
