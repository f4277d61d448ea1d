//! Scheduler orchestrator configuration.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Orchestrator loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the orchestrator loop runs in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lock owner id for this process. Generated when empty.
    #[serde(default)]
    pub instance_id: String,
    /// Seconds between ticks when no wake signal arrives.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
    /// Seconds to sleep after a tick failed.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,
    /// Maximum queued executions dispatched per tick.
    #[serde(default = "default_queued_batch_size")]
    pub queued_batch_size: usize,
    /// Lease length for `schedule:{id}` locks.
    #[serde(default = "default_schedule_lock")]
    pub schedule_lock_seconds: u64,
    /// Lease length for `execution:{id}` locks. Bounds runaway executions.
    #[serde(default = "default_execution_lock")]
    pub execution_lock_seconds: u64,
    /// How long shutdown waits for in-flight executions before abandoning them.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Dates excluded from business-day calculations.
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            instance_id: String::new(),
            tick_interval_seconds: default_tick_interval(),
            error_backoff_seconds: default_error_backoff(),
            queued_batch_size: default_queued_batch_size(),
            schedule_lock_seconds: default_schedule_lock(),
            execution_lock_seconds: default_execution_lock(),
            shutdown_grace_seconds: default_shutdown_grace(),
            holidays: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Return the configured instance id or generate one.
    pub fn resolve_instance_id(&self) -> String {
        if self.instance_id.trim().is_empty() {
            format!("scheduler-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
        } else {
            self.instance_id.clone()
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    10
}

fn default_error_backoff() -> u64 {
    30
}

fn default_queued_batch_size() -> usize {
    10
}

fn default_schedule_lock() -> u64 {
    300
}

fn default_execution_lock() -> u64 {
    3600
}

fn default_shutdown_grace() -> u64 {
    30
}
