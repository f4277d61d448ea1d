//! Per-job circuit breaker.

pub mod model;
pub mod state;

pub use model::JobCircuitBreaker;
pub use state::CircuitBreakerState;
