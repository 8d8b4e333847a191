//! Persistence interfaces for resources, thumbnail definitions and focal-point
//! bindings.
//!
//! Two implementations are provided: [`PgRepository`] backed by PostgreSQL and
//! [`InMemoryRepository`] used when no database is configured and in tests.

use crate::error::Result;
use crate::model::{
    GrabInput, GrabKey, GrabProperty, NewResource, Page, Resource, ResourceChanges,
    ResourceFilter, ResourceTranslation, ThumbnailDefinition,
};
use async_trait::async_trait;

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PgRepository;

/// Row offset of a 1-based page, saturating instead of wrapping
pub(crate) fn page_offset(page: u32, per_page: u32) -> u64 {
    u64::from(page.saturating_sub(1)).saturating_mul(u64::from(per_page))
}

/// Resource records
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Insert a new record; fails when the id or the `(disk, path)` pair is taken
    async fn create(&self, resource: NewResource) -> Result<Resource>;

    /// Live record by id
    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>>;

    /// Record by id, soft-deleted ones included
    async fn find_by_id_with_trashed(&self, id: &str) -> Result<Option<Resource>>;

    /// Live records for a set of ids
    async fn find_many(&self, ids: &[String]) -> Result<Vec<Resource>>;

    /// Oldest record matching the filter
    async fn find_one_by(&self, filter: &ResourceFilter) -> Result<Option<Resource>>;

    async fn update(&self, id: &str, changes: ResourceChanges) -> Result<()>;

    /// Set the soft-delete marker on live records
    async fn delete_soft(&self, ids: &[String]) -> Result<Vec<Resource>>;

    /// Clear the soft-delete marker
    async fn restore(&self, ids: &[String]) -> Result<Vec<Resource>>;

    /// Remove records and their translations permanently
    async fn force_delete(&self, ids: &[String]) -> Result<Vec<Resource>>;

    /// Newest first, `page` starts at 1
    async fn list_paginated(
        &self,
        filter: &ResourceFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Resource>>;

    async fn translations(&self, resource_id: &str) -> Result<Vec<ResourceTranslation>>;

    async fn save_translation(&self, translation: ResourceTranslation) -> Result<()>;
}

/// Thumbnail definitions (reference data)
#[async_trait]
pub trait ThumbnailRepository: Send + Sync {
    async fn find_thumbnail(&self, id: &str) -> Result<Option<ThumbnailDefinition>>;

    async fn find_thumbnails(&self, ids: &[String]) -> Result<Vec<ThumbnailDefinition>>;

    async fn upsert_thumbnail(&self, thumbnail: ThumbnailDefinition) -> Result<()>;
}

/// Focal-point bindings
#[async_trait]
pub trait GrabPropertyRepository: Send + Sync {
    async fn find_grab(&self, key: &GrabKey) -> Result<Option<GrabProperty>>;

    async fn create_grab(&self, input: &GrabInput) -> Result<GrabProperty>;

    /// Store a new anchor for an existing binding
    async fn update_grab(&self, input: &GrabInput) -> Result<()>;
}
