//! Execution inspection and cancellation commands.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Subcommand};
use tabled::Tabled;

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_core::types::ExecutionId;
use jobhub_entity::execution::JobExecution;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ExecutionArgs {
    #[command(subcommand)]
    pub command: ExecutionCommand,
}

#[derive(Debug, Subcommand)]
pub enum ExecutionCommand {
    /// Show one execution
    Show { id: String },
    /// Cancel a queued, running, or retrying execution
    Cancel {
        id: String,
        #[arg(short, long, default_value = "cancelled from CLI")]
        reason: String,
    },
    /// List running and queued executions
    Running {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// List failed and timed-out executions
    Failed {
        /// First UTC day to include (YYYY-MM-DD); defaults to today
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
}

/// Table row for execution listings.
#[derive(Tabled)]
pub struct ExecutionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Queued")]
    queued_at: String,
    #[tabled(rename = "Duration (s)")]
    duration: i64,
    #[tabled(rename = "Attempt")]
    attempt: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl From<&JobExecution> for ExecutionRow {
    fn from(execution: &JobExecution) -> Self {
        Self {
            id: execution.id.to_string(),
            status: execution.status.to_string(),
            queued_at: execution.queued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            duration: execution.duration_seconds,
            attempt: format!("{}/{}", execution.retry_attempt, execution.max_retry_attempts),
            trigger: if execution.is_manual {
                output::or_dash(execution.triggered_by.as_deref())
            } else {
                "schedule".to_string()
            },
            error: output::or_dash(execution.error_message.as_deref()),
        }
    }
}

fn parse_id(id: &str) -> Result<ExecutionId, AppError> {
    id.parse()
        .map_err(|e| AppError::validation(format!("Invalid execution id '{id}': {e}")))
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

pub async fn execute(
    args: &ExecutionArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let queue = super::execution_queue(super::open_stores(config).await?);

    match &args.command {
        ExecutionCommand::Show { id } => {
            let execution = queue.execution(&parse_id(id)?).await?;
            let fields = [
                ("ID", execution.id.to_string()),
                ("Job", execution.job_id.to_string()),
                ("Schedule", output::or_dash(execution.schedule_id)),
                ("Status", execution.status.to_string()),
                ("Queued at", execution.queued_at.to_rfc3339()),
                ("Started at", output::or_dash(execution.started_at.map(|t| t.to_rfc3339()))),
                ("Completed at", output::or_dash(execution.completed_at.map(|t| t.to_rfc3339()))),
                ("Duration (s)", execution.duration_seconds.to_string()),
                (
                    "Retry attempt",
                    format!("{}/{}", execution.retry_attempt, execution.max_retry_attempts),
                ),
                ("Next retry", output::or_dash(execution.next_retry_at.map(|t| t.to_rfc3339()))),
                ("Host", output::or_dash(execution.host_instance.as_deref())),
                ("Error", output::or_dash(execution.error_message.as_deref())),
            ];
            output::print_item(&fields, &execution, format);
        }
        ExecutionCommand::Cancel { id, reason } => {
            let execution = queue.cancel(&parse_id(id)?, reason).await?;
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Execution {} cancelled", execution.id))
                }
                OutputFormat::Json => output::print_json(&execution),
            }
        }
        ExecutionCommand::Running { limit } => {
            let executions = queue.running(*limit).await?;
            let rows: Vec<ExecutionRow> = executions.iter().map(ExecutionRow::from).collect();
            output::print_list(&rows, &executions, format);
        }
        ExecutionCommand::Failed { since, limit } => {
            let executions = match since {
                Some(day) => queue.failed_since(day_start(*day), *limit).await?,
                None => queue.failed_today(*limit).await?,
            };
            let rows: Vec<ExecutionRow> = executions.iter().map(ExecutionRow::from).collect();
            output::print_list(&rows, &executions, format);
        }
    }

    Ok(())
}
