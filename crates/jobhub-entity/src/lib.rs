//! # jobhub-entity
//!
//! Domain entities for the JobHub scheduler. Each table-backed struct
//! derives `sqlx::FromRow`; policies and schedule rules are value objects
//! stored as JSONB. State changes go through methods that take the current
//! time explicitly and reject illegal transitions.

pub mod circuit;
pub mod execution;
pub mod job;
pub mod schedule;
