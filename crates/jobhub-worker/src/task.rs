//! Minimal periodic-task runner driven by `tokio::time`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use jobhub_coord::DistributedLockService;
use jobhub_core::result::AppResult;

/// Work repeated on a fixed interval.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Pause after a successful run.
    fn interval(&self) -> Duration;

    /// Pause after a failed run.
    fn error_backoff(&self) -> Duration {
        self.interval()
    }

    async fn run_once(&self) -> AppResult<()>;
}

/// Run `task` until `cancel` turns `true`. The first run starts immediately.
pub async fn run_periodic(task: Arc<dyn PeriodicTask>, mut cancel: watch::Receiver<bool>) {
    info!(task = task.name(), interval_seconds = task.interval().as_secs(), "Periodic task started");
    loop {
        if *cancel.borrow() {
            break;
        }
        let pause = match task.run_once().await {
            Ok(()) => {
                debug!(task = task.name(), "Periodic task run complete");
                task.interval()
            }
            Err(e) => {
                warn!(task = task.name(), error = %e, "Periodic task run failed");
                task.error_backoff()
            }
        };
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
    info!(task = task.name(), "Periodic task stopped");
}

/// Periodically drops leases that expired without being released.
#[derive(Debug, Clone)]
pub struct LeaseJanitor {
    locks: DistributedLockService,
    interval: Duration,
}

impl LeaseJanitor {
    pub fn new(locks: DistributedLockService, interval: Duration) -> Self {
        Self { locks, interval }
    }
}

#[async_trait]
impl PeriodicTask for LeaseJanitor {
    fn name(&self) -> &str {
        "lease-janitor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> AppResult<()> {
        let purged = self.locks.purge_expired().await?;
        if purged > 0 {
            debug!(purged, "Expired leases dropped");
        }
        Ok(())
    }
}
