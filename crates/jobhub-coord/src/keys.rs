//! Lock key builders.
//!
//! Every lock the scheduler takes is named here so instances agree on keys.

use jobhub_core::types::{ExecutionId, ScheduleId};

/// Held while a due schedule is turned into a queued execution.
pub fn schedule_lock_key(id: ScheduleId) -> String {
    format!("schedule:{id}")
}

/// Held for the whole time an execution is being run by one instance.
pub fn execution_lock_key(id: ExecutionId) -> String {
    format!("execution:{id}")
}

/// Held by the one instance allowed to run the circuit-breaker monitor.
pub fn monitor_lock_key() -> &'static str {
    "monitor:circuit-breakers"
}
