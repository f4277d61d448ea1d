//! # jobhub-database
//!
//! Persistence for the scheduler: the store traits the worker depends on,
//! their PostgreSQL implementations, and an in-memory implementation used
//! by tests and single-process deployments.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use store::{
    CircuitBreakerStore, ExecutionStore, JobStore, ScheduleStore, StatusCount, Stores,
};
