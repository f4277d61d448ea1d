//! Transition notifiers and the fire-and-forget publish helper.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_core::events::TransitionEvent;
use jobhub_core::result::AppResult;
use jobhub_core::traits::notifier::TransitionNotifier;

/// Writes every transition to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl TransitionNotifier for LogNotifier {
    async fn notify(&self, event: &TransitionEvent) -> AppResult<()> {
        info!(
            event = event.kind.notification_name(),
            job_id = %event.job_id,
            job = %event.job_name,
            reason = event.reason.as_deref().unwrap_or(""),
            consecutive_failures = event.consecutive_failures,
            half_open_attempts = event.half_open_attempts,
            actor = %event.actor,
            "Circuit breaker transition"
        );
        Ok(())
    }
}

/// Fans transitions out to in-process subscribers such as a dashboard push
/// channel. Events sent while nobody listens are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<TransitionEvent>,
}

impl BroadcastNotifier {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl TransitionNotifier for BroadcastNotifier {
    async fn notify(&self, event: &TransitionEvent) -> AppResult<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Deliver `event`, logging instead of propagating a delivery failure.
pub async fn publish_transition(notifier: &dyn TransitionNotifier, event: TransitionEvent) {
    if let Err(e) = notifier.notify(&event).await {
        warn!(
            event = event.kind.notification_name(),
            job_id = %event.job_id,
            error = %e,
            "Failed to deliver transition notification"
        );
    }
}

/// Build the notifier selected by `notifications.provider`.
pub async fn notifier_from_config(config: &AppConfig) -> AppResult<Arc<dyn TransitionNotifier>> {
    let notifications = &config.notifications;
    match notifications.provider.as_str() {
        "log" => Ok(Arc::new(LogNotifier)),
        "broadcast" => Ok(Arc::new(BroadcastNotifier::new(notifications.buffer_size))),
        "redis" => {
            info!(channel = %notifications.channel, "Publishing transitions to Redis");
            let client = jobhub_coord::redis::RedisClient::connect(&config.lock.redis).await?;
            Ok(Arc::new(jobhub_coord::redis::RedisTransitionNotifier::new(
                client,
                notifications.channel.clone(),
            )))
        }
        other => Err(AppError::configuration(format!(
            "Unknown notification provider: '{other}'. Supported: log, broadcast, redis"
        ))),
    }
}
