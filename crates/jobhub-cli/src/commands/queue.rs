//! Execution queue statistics.

use clap::{Args, Subcommand};

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Execution counts by status
    Stats,
}

pub async fn execute(args: &QueueArgs, config: &AppConfig, format: OutputFormat) -> Result<(), AppError> {
    let queue = super::execution_queue(super::open_stores(config).await?);

    match &args.command {
        QueueCommand::Stats => {
            let stats = queue.stats().await?;
            let fields = [
                ("Queued", stats.queued.to_string()),
                ("Running", stats.running.to_string()),
                ("Retrying", stats.retrying.to_string()),
                ("Succeeded", stats.succeeded.to_string()),
                ("Failed", stats.failed.to_string()),
                ("Timed out", stats.timed_out.to_string()),
                ("Cancelled", stats.cancelled.to_string()),
                ("Skipped", stats.skipped.to_string()),
            ];
            if format == OutputFormat::Table {
                println!("Execution queue:");
            }
            output::print_item(&fields, &stats, format);
        }
    }

    Ok(())
}
