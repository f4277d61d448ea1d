//! Circuit-breaker transitions published on a Redis channel.

use async_trait::async_trait;
use tracing::debug;

use jobhub_core::error::{AppError, ErrorKind};
use jobhub_core::events::TransitionEvent;
use jobhub_core::result::AppResult;
use jobhub_core::traits::notifier::TransitionNotifier;

use super::client::RedisClient;

/// Publishes each [`TransitionEvent`] as JSON so other instances and
/// external consumers can subscribe.
#[derive(Debug, Clone)]
pub struct RedisTransitionNotifier {
    client: RedisClient,
    channel: String,
}

impl RedisTransitionNotifier {
    pub fn new(client: RedisClient, channel: impl Into<String>) -> Self {
        Self {
            client,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl TransitionNotifier for RedisTransitionNotifier {
    async fn notify(&self, event: &TransitionEvent) -> AppResult<()> {
        let message = serde_json::to_string(event)?;
        let mut conn = self.client.conn_mut();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(message)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::ServiceUnavailable, "Redis PUBLISH failed", e))?;
        debug!(
            channel = %self.channel,
            event = event.kind.notification_name(),
            receivers,
            "Transition published"
        );
        Ok(())
    }
}
