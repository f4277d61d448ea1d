//! Circuit-breaker monitor configuration.

use serde::{Deserialize, Serialize};

/// Settings for the periodic circuit-breaker evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Whether the monitor runs in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between evaluation cycles.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Seconds to wait after a failed cycle.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,
    /// Lease length for the monitor leadership lock. Only the holder evaluates
    /// breakers; another instance takes over once it lapses.
    #[serde(default = "default_lease")]
    pub lease_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_interval(),
            error_backoff_seconds: default_error_backoff(),
            lease_seconds: default_lease(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    30
}

fn default_error_backoff() -> u64 {
    10
}

fn default_lease() -> u64 {
    90
}
