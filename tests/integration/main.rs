//! End-to-end scheduler tests against the in-memory stores.

mod helpers;

mod breaker_test;
mod scheduler_test;
