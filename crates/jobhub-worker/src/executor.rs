//! Job executor: dispatches executions to registered handlers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use jobhub_core::error::AppError;
use jobhub_entity::execution::JobExecution;
use jobhub_entity::job::JobDefinition;

/// Business logic for one job type.
///
/// `deadline` is informational; the executor also enforces it by dropping
/// the future once the job's timeout elapses.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Registry key, matched against `JobDefinition::job_type`.
    fn job_type(&self) -> &str;

    async fn execute(
        &self,
        job: &JobDefinition,
        execution: &JobExecution,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Value>, JobExecutionError>;
}

/// Error returned by a handler.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// The job ran and failed.
    #[error("{message}")]
    Failed {
        message: String,
        stack_trace: Option<String>,
    },

    /// Infrastructure error inside the handler.
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            stack_trace: None,
        }
    }
}

/// How an attempt ended, before it is written onto the execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Succeeded(Option<Value>),
    Failed {
        message: String,
        stack_trace: Option<String>,
    },
    TimedOut,
}

/// Registered handlers by job type.
#[derive(Debug, Default)]
pub struct JobExecutor {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().to_string();
        info!(job_type = %job_type, "Registered job handler");
        self.handlers.insert(job_type, handler);
    }

    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run the handler for `job` under the job's timeout.
    ///
    /// The handler runs on its own task, so a panic inside it becomes a
    /// failed attempt. A missing handler is a failed attempt like any other.
    pub async fn run(&self, job: &JobDefinition, execution: &JobExecution) -> ExecutionOutcome {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            warn!(job_id = %job.id, job_type = %job.job_type, "No handler registered");
            return ExecutionOutcome::Failed {
                message: format!("No handler registered for job type '{}'", job.job_type),
                stack_trace: None,
            };
        };

        let timeout = job.timeout();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        info!(
            execution_id = %execution.id,
            job = %job.name,
            attempt = execution.retry_attempt + 1,
            max_attempts = execution.max_retry_attempts + 1,
            "Executing job"
        );

        let handler = handler.clone();
        let (owned_job, owned_execution) = (job.clone(), execution.clone());
        let mut task = tokio::spawn(async move {
            handler.execute(&owned_job, &owned_execution, deadline).await
        });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(output))) => ExecutionOutcome::Succeeded(output),
            Ok(Ok(Err(JobExecutionError::Failed {
                message,
                stack_trace,
            }))) => ExecutionOutcome::Failed {
                message,
                stack_trace,
            },
            Ok(Ok(Err(JobExecutionError::Internal(err)))) => ExecutionOutcome::Failed {
                message: err.to_string(),
                stack_trace: None,
            },
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    format!("Handler panicked: {}", panic_message(join_err.into_panic().as_ref()))
                } else {
                    "Handler task was cancelled".to_string()
                };
                error!(execution_id = %execution.id, job = %job.name, error = %message, "Job handler aborted");
                ExecutionOutcome::Failed {
                    message,
                    stack_trace: None,
                }
            }
            Err(_) => {
                task.abort();
                ExecutionOutcome::TimedOut
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use jobhub_entity::job::NewJob;

    #[derive(Debug)]
    struct Sleeper(Duration);

    #[async_trait]
    impl JobHandler for Sleeper {
        fn job_type(&self) -> &str {
            "sleep"
        }

        async fn execute(
            &self,
            _job: &JobDefinition,
            _execution: &JobExecution,
            _deadline: DateTime<Utc>,
        ) -> Result<Option<Value>, JobExecutionError> {
            tokio::time::sleep(self.0).await;
            Ok(Some(serde_json::json!({ "slept": self.0.as_secs() })))
        }
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl JobHandler for Failing {
        fn job_type(&self) -> &str {
            "fail"
        }

        async fn execute(
            &self,
            _job: &JobDefinition,
            _execution: &JobExecution,
            _deadline: DateTime<Utc>,
        ) -> Result<Option<Value>, JobExecutionError> {
            Err(JobExecutionError::Failed {
                message: "upstream returned 503".into(),
                stack_trace: Some("at fetch()".into()),
            })
        }
    }

    #[derive(Debug)]
    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        fn job_type(&self) -> &str {
            "panic"
        }

        async fn execute(
            &self,
            _job: &JobDefinition,
            _execution: &JobExecution,
            _deadline: DateTime<Utc>,
        ) -> Result<Option<Value>, JobExecutionError> {
            panic!("handler bug")
        }
    }

    fn job(job_type: &str, timeout_seconds: i32) -> JobDefinition {
        JobDefinition::new(NewJob::new("nightly", job_type, timeout_seconds, "tests"), Utc::now())
            .expect("valid job")
    }

    fn execution(job: &JobDefinition) -> JobExecution {
        JobExecution::manual(job.id, "tests", None, 0, Utc::now())
    }

    fn executor() -> JobExecutor {
        let mut executor = JobExecutor::new();
        executor.register(Arc::new(Sleeper(Duration::from_secs(5))));
        executor.register(Arc::new(Failing));
        executor.register(Arc::new(Panicking));
        executor
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_within_timeout() {
        let job = job("sleep", 10);
        let outcome = executor().run(&job, &execution(&job)).await;
        assert_eq!(outcome, ExecutionOutcome::Succeeded(Some(serde_json::json!({ "slept": 5 }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_produces_timeout() {
        let job = job("sleep", 2);
        assert_eq!(executor().run(&job, &execution(&job)).await, ExecutionOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_handler_failure_is_captured() {
        let job = job("fail", 10);
        match executor().run(&job, &execution(&job)).await {
            ExecutionOutcome::Failed {
                message,
                stack_trace,
            } => {
                assert_eq!(message, "upstream returned 503");
                assert_eq!(stack_trace.as_deref(), Some("at fetch()"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_handler_fails() {
        let job = job("unknown", 10);
        let outcome = executor().run(&job, &execution(&job)).await;
        assert!(matches!(outcome, ExecutionOutcome::Failed { ref message, .. } if message.contains("unknown")));
        assert_eq!(
            executor().registered_types(),
            vec!["fail".to_string(), "panic".to_string(), "sleep".to_string()]
        );
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failure() {
        let job = job("panic", 10);
        let outcome = executor().run(&job, &execution(&job)).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Failed {
                message: "Handler panicked: handler bug".to_string(),
                stack_trace: None,
            }
        );
    }
}
