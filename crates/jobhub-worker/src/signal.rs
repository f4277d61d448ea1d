//! Coalescing wake-up signal for the orchestrator loop.

use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

/// What changed since the loop last woke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    SchedulesChanged,
    ExecutionsChanged,
}

/// Lets writers cut the orchestrator's sleep short.
///
/// Any number of notifications collapse into one wake. Missing a signal only
/// delays work until the next tick.
#[derive(Debug)]
pub struct SchedulerSignal {
    tx: mpsc::UnboundedSender<SignalKind>,
    rx: Mutex<mpsc::UnboundedReceiver<SignalKind>>,
}

impl SchedulerSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn notify_schedules_changed(&self) {
        // The receiver lives as long as `self`.
        let _ = self.tx.send(SignalKind::SchedulesChanged);
    }

    pub fn notify_executions_changed(&self) {
        let _ = self.tx.send(SignalKind::ExecutionsChanged);
    }

    /// Wait until a notification arrives or `timeout` passes, then drain
    /// everything pending. Returns `true` when woken by a notification.
    ///
    /// A zero timeout drains and returns without waiting.
    pub async fn wait_for_signal(&self, timeout: Duration) -> bool {
        let mut rx = self.rx.lock().await;
        let woken = if timeout.is_zero() {
            rx.try_recv().is_ok()
        } else {
            matches!(tokio::time::timeout(timeout, rx.recv()).await, Ok(Some(_)))
        };
        while rx.try_recv().is_ok() {}
        woken
    }
}

impl Default for SchedulerSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_notification() {
        let signal = SchedulerSignal::new();
        let started = tokio::time::Instant::now();
        assert!(!signal.wait_for_signal(Duration::from_secs(10)).await);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_wake() {
        let signal = SchedulerSignal::new();
        for _ in 0..5 {
            signal.notify_executions_changed();
        }
        signal.notify_schedules_changed();

        assert!(signal.wait_for_signal(Duration::from_secs(10)).await);
        assert!(!signal.wait_for_signal(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_zero_timeout_drains_immediately() {
        let signal = SchedulerSignal::new();
        assert!(!signal.wait_for_signal(Duration::ZERO).await);
        signal.notify_schedules_changed();
        signal.notify_schedules_changed();
        assert!(signal.wait_for_signal(Duration::ZERO).await);
        assert!(!signal.wait_for_signal(Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wakes_on_notification_from_another_task() {
        let signal = std::sync::Arc::new(SchedulerSignal::new());
        let notifier = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            notifier.notify_schedules_changed();
        });
        let started = tokio::time::Instant::now();
        assert!(signal.wait_for_signal(Duration::from_secs(60)).await);
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
