//! Result alias shared by every JobHub crate.

use crate::error::AppError;

/// Result of any fallible scheduler, store, or lock operation.
pub type AppResult<T> = Result<T, AppError>;
