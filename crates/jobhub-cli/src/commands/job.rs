//! Job inspection and manual trigger commands.

use clap::{Args, Subcommand};
use tabled::Tabled;

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_core::types::PageRequest;
use jobhub_entity::job::JobDefinition;

use super::execution::ExecutionRow;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct JobArgs {
    #[command(subcommand)]
    pub command: JobCommand,
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// List registered jobs
    List {
        #[arg(long, default_value = "1")]
        page: u64,
        #[arg(long, default_value = "50")]
        page_size: u64,
    },
    /// Show one job by id or name
    Show { job: String },
    /// Queue a run of a job now
    Trigger {
        /// Job id or name
        job: String,
        /// JSON input handed to the job handler
        #[arg(short, long)]
        input: Option<String>,
        /// Operator recorded as the trigger source
        #[arg(long, default_value = super::CLI_ACTOR)]
        by: String,
    },
    /// Execution history of a job, newest first
    Executions {
        /// Job id or name
        job: String,
        #[arg(long, default_value = "1")]
        page: u64,
        #[arg(long, default_value = "20")]
        page_size: u64,
    },
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Max Concurrent")]
    max_concurrent: i32,
    #[tabled(rename = "Timeout (s)")]
    timeout: i32,
    #[tabled(rename = "Breaker")]
    breaker: String,
}

impl From<&JobDefinition> for JobRow {
    fn from(job: &JobDefinition) -> Self {
        Self {
            id: job.id.to_string(),
            name: job.name.clone(),
            job_type: job.job_type.clone(),
            status: job.status.to_string(),
            max_concurrent: job.max_concurrent_executions,
            timeout: job.timeout_seconds,
            breaker: if job.circuit_breaker_policy.enabled() {
                "enabled".to_string()
            } else {
                "disabled".to_string()
            },
        }
    }
}

pub async fn execute(args: &JobArgs, config: &AppConfig, format: OutputFormat) -> Result<(), AppError> {
    let stores = super::open_stores(config).await?;

    match &args.command {
        JobCommand::List { page, page_size } => {
            let jobs = stores.jobs.find_all(&PageRequest::new(*page, *page_size)).await?;
            let rows: Vec<JobRow> = jobs.items.iter().map(JobRow::from).collect();
            output::print_list(&rows, &jobs.items, format);
            if format == OutputFormat::Table {
                println!("Page {}/{} ({} jobs)", jobs.page, jobs.total_pages, jobs.total_items);
            }
        }
        JobCommand::Show { job } => {
            let job = super::resolve_job(&stores, job).await?;
            let retry = job.retry_policy;
            let running = stores.executions.count_running(&job.id).await?;
            let active = stores.executions.count_active(&job.id).await?;
            let fields = [
                ("ID", job.id.to_string()),
                ("Name", job.name.clone()),
                ("Type", job.job_type.clone()),
                ("Status", job.status.to_string()),
                ("Timeout (s)", job.timeout_seconds.to_string()),
                ("Max concurrent", job.max_concurrent_executions.to_string()),
                ("Running / active", format!("{running} / {active}")),
                ("Manual trigger", job.allow_manual_trigger.to_string()),
                (
                    "Retries",
                    format!(
                        "{} ({}, base {}s)",
                        retry.max_retries(),
                        retry.strategy(),
                        retry.base_delay_seconds()
                    ),
                ),
                ("Breaker enabled", job.circuit_breaker_policy.enabled().to_string()),
                ("Disabled reason", output::or_dash(job.disabled_reason.as_deref())),
            ];
            output::print_item(&fields, &job, format);
        }
        JobCommand::Trigger { job, input, by } => {
            let job = super::resolve_job(&stores, job).await?;
            let input = input
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()
                .map_err(|e| AppError::validation(format!("Invalid JSON input: {e}")))?;
            let execution = super::execution_queue(stores).trigger(&job.id, by, input).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Job '{}' queued (execution {})",
                    job.name, execution.id
                )),
                OutputFormat::Json => output::print_json(&execution),
            }
        }
        JobCommand::Executions { job, page, page_size } => {
            let job = super::resolve_job(&stores, job).await?;
            let history = super::execution_queue(stores)
                .executions_for_job(&job.id, &PageRequest::new(*page, *page_size))
                .await?;
            let rows: Vec<ExecutionRow> = history.items.iter().map(ExecutionRow::from).collect();
            output::print_list(&rows, &history.items, format);
            if format == OutputFormat::Table {
                println!(
                    "Page {}/{} ({} executions)",
                    history.page, history.total_pages, history.total_items
                );
            }
        }
    }

    Ok(())
}
