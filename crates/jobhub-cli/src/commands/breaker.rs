//! Circuit breaker inspection and manual control.

use clap::{Args, Subcommand};

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_worker::CircuitBreakerService;
use jobhub_worker::notify::notifier_from_config;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct BreakerArgs {
    #[command(subcommand)]
    pub command: BreakerCommand,
}

#[derive(Debug, Subcommand)]
pub enum BreakerCommand {
    /// Show the breaker of a job
    Status {
        /// Job id or name
        job: String,
    },
    /// Open the breaker and disable the job
    Open {
        /// Job id or name
        job: String,
        #[arg(short, long)]
        reason: String,
        #[arg(long, default_value = super::CLI_ACTOR)]
        by: String,
    },
    /// Close the breaker and reactivate the job
    Close {
        /// Job id or name
        job: String,
        #[arg(long, default_value = super::CLI_ACTOR)]
        by: String,
    },
}

pub async fn execute(
    args: &BreakerArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let stores = super::open_stores(config).await?;
    let breakers = CircuitBreakerService::new(stores.clone(), notifier_from_config(config).await?);

    match &args.command {
        BreakerCommand::Status { job } => {
            let job = super::resolve_job(&stores, job).await?;
            let status = breakers.status(&job.id).await?;
            let breaker = &status.breaker;
            let policy = &status.policy;
            let fields = [
                ("Job", format!("{} ({})", status.job_name, status.job_id)),
                ("Job status", status.job_status.to_string()),
                ("State", breaker.state.to_string()),
                ("Consecutive failures", breaker.consecutive_failures.to_string()),
                ("Half-open attempts", breaker.half_open_attempts.to_string()),
                ("Opened at", output::or_dash(breaker.opened_at.map(|t| t.to_rfc3339()))),
                ("Opened by", output::or_dash(breaker.opened_by.as_deref())),
                ("Reason", output::or_dash(breaker.open_reason.as_deref())),
                ("Policy enabled", policy.enabled().to_string()),
                (
                    "Threshold",
                    format!(
                        "{} in last {}",
                        policy.failure_threshold(),
                        policy.consecutive_failures_window()
                    ),
                ),
                ("Open duration (s)", policy.open_duration_seconds().to_string()),
                ("Auto recover", policy.auto_recover().to_string()),
            ];
            output::print_item(&fields, &status, format);
        }
        BreakerCommand::Open { job, reason, by } => {
            let job = super::resolve_job(&stores, job).await?;
            let breaker = breakers.force_open(&job.id, reason, by).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Circuit breaker for '{}' is {}",
                    job.name, breaker.state
                )),
                OutputFormat::Json => output::print_json(&breaker),
            }
        }
        BreakerCommand::Close { job, by } => {
            let job = super::resolve_job(&stores, job).await?;
            let breaker = breakers.force_close(&job.id, by).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Circuit breaker for '{}' is {}",
                    job.name, breaker.state
                )),
                OutputFormat::Json => output::print_json(&breaker),
            }
        }
    }

    Ok(())
}
