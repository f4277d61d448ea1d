//! Job definition entity and its policies.

pub mod circuit_policy;
pub mod model;
pub mod retry;
pub mod status;

pub use circuit_policy::CircuitBreakerPolicy;
pub use model::{JobDefinition, NewJob};
pub use retry::{JitterSource, RetryPolicy, RetryStrategy, ThreadRngJitter};
pub use status::JobStatus;
