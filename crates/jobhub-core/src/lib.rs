//! # jobhub-core
//!
//! Core crate for the JobHub scheduler. Contains the unified error system,
//! configuration schemas, typed identifiers, circuit-breaker transition
//! events, pagination types, and the traits implemented by the storage,
//! lock, and notification backends.
//!
//! This crate has **no** internal dependencies on other JobHub crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
