//! CLI command definitions and dispatch.

pub mod breaker;
pub mod execution;
pub mod job;
pub mod migrate;
pub mod queue;

use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_core::types::JobId;
use jobhub_database::{DatabasePool, Stores};
use jobhub_entity::job::JobDefinition;
use jobhub_worker::{ExecutionQueue, SchedulerSignal};

use crate::output::OutputFormat;

/// Lock owner and host name recorded for work created from the CLI.
pub const CLI_ACTOR: &str = "jobhub-cli";

/// JobHub scheduler administration
#[derive(Debug, Parser)]
#[command(name = "jobhub", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Database migration management
    Migrate(migrate::MigrateArgs),
    /// Job inspection and manual triggers
    Job(job::JobArgs),
    /// Execution inspection and cancellation
    Execution(execution::ExecutionArgs),
    /// Circuit breaker status and manual control
    Breaker(breaker::BreakerArgs),
    /// Execution queue statistics
    Queue(queue::QueueArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        let config = load_config(&self.config)?;
        match &self.command {
            Commands::Migrate(args) => migrate::execute(args, &config).await,
            Commands::Job(args) => job::execute(args, &config, self.format).await,
            Commands::Execution(args) => execution::execute(args, &config, self.format).await,
            Commands::Breaker(args) => breaker::execute(args, &config, self.format).await,
            Commands::Queue(args) => queue::execute(args, &config, self.format).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    AppConfig::load_from(config_path)
}

/// Helper: PostgreSQL stores for the configured database
pub async fn open_stores(config: &AppConfig) -> Result<Stores, AppError> {
    let pool = DatabasePool::connect(&config.database).await?;
    Ok(pool.stores())
}

/// Helper: an execution queue writing through `stores`.
///
/// The running scheduler is not signalled; it picks new work up on its next tick.
pub fn execution_queue(stores: Stores) -> ExecutionQueue {
    ExecutionQueue::new(stores, Arc::new(SchedulerSignal::new()), CLI_ACTOR)
}

/// Resolve a job given either its id or its name.
pub async fn resolve_job(stores: &Stores, job: &str) -> Result<JobDefinition, AppError> {
    let found = match JobId::from_str(job) {
        Ok(id) => stores.jobs.find_by_id(&id).await?,
        Err(_) => stores.jobs.find_by_name(job).await?,
    };
    found.ok_or_else(|| AppError::not_found(format!("Job '{job}' not found")))
}
