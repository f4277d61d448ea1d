//! Transition notification sink.

use async_trait::async_trait;

use crate::events::TransitionEvent;
use crate::result::AppResult;

/// Receives circuit-breaker transitions.
///
/// Callers log a returned error and carry on; a failed delivery never
/// undoes or blocks the transition itself.
#[async_trait]
pub trait TransitionNotifier: Send + Sync + 'static {
    async fn notify(&self, event: &TransitionEvent) -> AppResult<()>;
}
