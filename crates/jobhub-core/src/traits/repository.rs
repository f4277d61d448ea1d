//! Generic repository trait for database access.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::pagination::{PageRequest, PageResponse};

/// Basic persistence shared by every entity store.
///
/// History is append-only, so there is no delete. Entity-specific query
/// shapes live on the store traits in `jobhub-database`.
#[async_trait]
pub trait Repository<Entity, Id>: Send + Sync + 'static
where
    Entity: Send + Sync + 'static,
    Id: Send + Sync + 'static,
{
    /// Find an entity by its primary key.
    async fn find_by_id(&self, id: &Id) -> AppResult<Option<Entity>>;

    /// Find all entities with pagination.
    async fn find_all(&self, page: &PageRequest) -> AppResult<PageResponse<Entity>>;

    /// Insert a new entity and return the stored version.
    async fn create(&self, entity: &Entity) -> AppResult<Entity>;

    /// Overwrite an existing entity and return the stored version.
    async fn update(&self, entity: &Entity) -> AppResult<Entity>;

    /// Count total entities.
    async fn count(&self) -> AppResult<u64>;
}
