//! Execution attempts and their lifecycle.

pub mod model;
pub mod status;

pub use model::JobExecution;
pub use status::ExecutionStatus;
