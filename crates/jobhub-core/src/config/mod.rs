//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod database;
pub mod lock;
pub mod logging;
pub mod monitor;
pub mod notifications;
pub mod scheduler;

use serde::{Deserialize, Serialize};

pub use self::database::DatabaseConfig;
pub use self::lock::{LockConfig, RedisLockConfig};
pub use self::logging::LoggingConfig;
pub use self::monitor::MonitorConfig;
pub use self::notifications::NotificationsConfig;
pub use self::scheduler::SchedulerConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Distributed lock store settings.
    #[serde(default)]
    pub lock: LockConfig,
    /// Orchestrator loop settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Circuit-breaker monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Transition notification settings.
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration for the given environment name.
    ///
    /// Merges `config/default.toml`, an environment-specific overlay
    /// (`config/{env}.toml`) and environment variables prefixed with
    /// `JOBHUB__` (e.g. `JOBHUB__LOCK__PROVIDER=redis`).
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::build(
            config::Config::builder()
                .add_source(config::File::with_name("config/default").required(false))
                .add_source(config::File::with_name(&format!("config/{env}")).required(false)),
        )
    }

    /// Load configuration from an explicit file path plus `JOBHUB__` environment variables.
    pub fn load_from(path: &str) -> Result<Self, AppError> {
        Self::build(config::Config::builder().add_source(config::File::with_name(path)))
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, AppError> {
        let config = builder
            .add_source(
                config::Environment::with_prefix("JOBHUB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
