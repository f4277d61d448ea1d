//! Built-in job handlers registered by the scheduler binary.

pub mod report;
pub mod sleep;

use std::sync::Arc;

use jobhub_database::Stores;

use crate::executor::JobExecutor;

/// Register every built-in handler on `executor`.
pub fn register_builtin(executor: &mut JobExecutor, stores: &Stores) {
    executor.register(Arc::new(report::QueueReportHandler::new(stores.clone())));
    executor.register(Arc::new(sleep::SleepHandler));
}
