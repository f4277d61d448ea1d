//! Execution history summary job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::info;

use jobhub_database::Stores;
use jobhub_entity::execution::JobExecution;
use jobhub_entity::job::JobDefinition;

use crate::executor::{JobExecutionError, JobHandler};

/// Counts executions by status and returns the counts as output.
#[derive(Debug)]
pub struct QueueReportHandler {
    stores: Stores,
}

impl QueueReportHandler {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl JobHandler for QueueReportHandler {
    fn job_type(&self) -> &str {
        "queue_report"
    }

    async fn execute(
        &self,
        job: &JobDefinition,
        _execution: &JobExecution,
        _deadline: DateTime<Utc>,
    ) -> Result<Option<Value>, JobExecutionError> {
        let counts = self.stores.executions.count_by_status().await?;
        let mut by_status = Map::new();
        let mut total = 0i64;
        for row in counts {
            total += row.count;
            by_status.insert(row.status.to_string(), Value::from(row.count));
        }
        info!(job = %job.name, total, "Execution report generated");
        Ok(Some(serde_json::json!({
            "total": total,
            "by_status": by_status,
        })))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use jobhub_database::MemoryStore;
    use jobhub_entity::job::NewJob;

    #[tokio::test]
    async fn test_reports_counts_by_status() {
        let stores = Stores::memory(Arc::new(MemoryStore::new()));
        let job = JobDefinition::new(NewJob::new("report", "queue_report", 60, "tests"), Utc::now())
            .expect("valid job");
        let job = stores.jobs.create(&job).await.expect("stored");
        let mut done = JobExecution::manual(job.id, "ops", None, 0, Utc::now());
        done.start(Utc::now()).expect("start");
        done.complete(None, Utc::now()).expect("complete");
        stores.executions.create(&done).await.expect("stored");
        let queued = JobExecution::manual(job.id, "ops", None, 0, Utc::now());
        stores.executions.create(&queued).await.expect("stored");

        let output = QueueReportHandler::new(stores)
            .execute(&job, &queued, Utc::now())
            .await
            .expect("report runs")
            .expect("report has output");
        assert_eq!(output["total"], 2);
        assert_eq!(output["by_status"]["succeeded"], 1);
        assert_eq!(output["by_status"]["queued"], 1);
    }
}
