//! PostgreSQL repositories for the scheduler entities.

pub mod circuit;
pub mod execution;
pub mod job;
pub mod schedule;

pub use circuit::CircuitBreakerRepository;
pub use execution::ExecutionRepository;
pub use job::JobRepository;
pub use schedule::ScheduleRepository;

use jobhub_core::error::{AppError, ErrorKind};

/// Wrap a sqlx error with a short description of what was attempted.
pub(crate) fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::with_source(ErrorKind::Database, context, e)
}

/// Clamp a `usize` limit into a SQL `BIGINT`.
pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
