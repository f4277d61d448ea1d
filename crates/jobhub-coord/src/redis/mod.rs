//! Redis lock backend and transition publisher.

pub mod client;
pub mod lock;
pub mod publisher;

pub use client::RedisClient;
pub use lock::RedisLockStore;
pub use publisher::RedisTransitionNotifier;
