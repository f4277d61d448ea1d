//! A handler that waits, optionally failing afterwards.
//!
//! Input: `{"seconds": 5, "fail": false}`. Useful for exercising timeouts,
//! retries and the circuit breaker against a live deployment.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use jobhub_entity::execution::JobExecution;
use jobhub_entity::job::JobDefinition;

use crate::executor::{JobExecutionError, JobHandler};

#[derive(Debug, Default, Deserialize)]
struct SleepInput {
    #[serde(default)]
    seconds: u64,
    #[serde(default)]
    fail: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    fn job_type(&self) -> &str {
        "sleep"
    }

    async fn execute(
        &self,
        _job: &JobDefinition,
        execution: &JobExecution,
        _deadline: DateTime<Utc>,
    ) -> Result<Option<Value>, JobExecutionError> {
        let input: SleepInput = match &execution.input {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| JobExecutionError::failed(format!("Invalid sleep input: {e}")))?,
            None => SleepInput::default(),
        };
        tokio::time::sleep(Duration::from_secs(input.seconds)).await;
        if input.fail {
            return Err(JobExecutionError::failed(format!(
                "Requested failure after {}s",
                input.seconds
            )));
        }
        Ok(Some(serde_json::json!({ "slept_seconds": input.seconds })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobhub_core::types::JobId;
    use jobhub_entity::job::NewJob;

    fn job() -> JobDefinition {
        JobDefinition::new(NewJob::new("sleepy", "sleep", 60, "tests"), Utc::now()).expect("valid job")
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_then_succeeds() {
        let execution = JobExecution::manual(
            JobId::new(),
            "ops",
            Some(serde_json::json!({"seconds": 30})),
            0,
            Utc::now(),
        );
        let output = SleepHandler
            .execute(&job(), &execution, Utc::now())
            .await
            .expect("succeeds");
        assert_eq!(output, Some(serde_json::json!({"slept_seconds": 30})));
    }

    #[tokio::test]
    async fn test_requested_failure_and_bad_input() {
        let input = Some(serde_json::json!({"fail": true}));
        let failing = JobExecution::manual(JobId::new(), "ops", input, 0, Utc::now());
        assert!(SleepHandler.execute(&job(), &failing, Utc::now()).await.is_err());

        let input = Some(serde_json::json!({"seconds": "x"}));
        let bad = JobExecution::manual(JobId::new(), "ops", input, 0, Utc::now());
        let err = SleepHandler.execute(&job(), &bad, Utc::now()).await.expect_err("bad input");
        assert!(err.to_string().contains("Invalid sleep input"));
    }
}
