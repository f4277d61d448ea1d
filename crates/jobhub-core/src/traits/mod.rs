//! Capabilities defined in `jobhub-core` and implemented by other crates.

pub mod lock;
pub mod notifier;
pub mod repository;

pub use lock::LockStore;
pub use notifier::TransitionNotifier;
pub use repository::Repository;
