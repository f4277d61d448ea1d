//! In-process lock store.

pub mod lock;

pub use lock::MemoryLockStore;
