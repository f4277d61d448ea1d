//! Transition notification configuration.

use serde::{Deserialize, Serialize};

/// Where circuit-breaker transition events are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Notifier type: `"log"`, `"broadcast"`, or `"redis"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Redis pub/sub channel used by the `redis` notifier.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Buffer size of the in-process broadcast channel.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            channel: default_channel(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_provider() -> String {
    "log".to_string()
}

fn default_channel() -> String {
    "jobhub:transitions".to_string()
}

fn default_buffer_size() -> usize {
    256
}
