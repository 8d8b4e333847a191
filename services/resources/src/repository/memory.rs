use super::{page_offset, GrabPropertyRepository, ResourceRepository, ThumbnailRepository};
use crate::error::{ResourceError, Result};
use crate::model::{
    GrabInput, GrabKey, GrabProperty, NewResource, Page, Resource, ResourceChanges,
    ResourceFilter, ResourceTranslation, ThumbnailDefinition,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    resources: HashMap<String, Resource>,
    translations: HashMap<String, Vec<ResourceTranslation>>,
    thumbnails: HashMap<String, ThumbnailDefinition>,
    grabs: HashMap<GrabKey, GrabProperty>,
}

/// Process-local repository
#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resource records, soft-deleted ones included
    pub fn resource_count(&self) -> usize {
        self.read().resources.len()
    }

    /// Record by id, soft-deleted ones included
    pub fn find_with_trashed(&self, id: &str) -> Option<Resource> {
        self.read().resources.get(id).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn sorted(mut resources: Vec<Resource>) -> Vec<Resource> {
    resources.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    resources
}

#[async_trait]
impl ResourceRepository for InMemoryRepository {
    async fn create(&self, new: NewResource) -> Result<Resource> {
        let mut state = self.write();

        if state.resources.contains_key(&new.id) {
            return Err(ResourceError::Repository(format!(
                "resource id already exists: {}",
                new.id
            )));
        }
        if state
            .resources
            .values()
            .any(|r| r.disk == new.disk && r.path == new.path)
        {
            return Err(ResourceError::Repository(format!(
                "path already taken on disk {}: {}",
                new.disk, new.path
            )));
        }

        let now = Utc::now();
        let resource = Resource {
            id: new.id,
            disk: new.disk,
            path: new.path,
            extension: new.extension,
            original_name: new.original_name,
            safe_name: new.safe_name,
            mime_type: new.mime_type,
            size: new.size,
            checksum: None,
            uploaded_by: new.uploaded_by,
            owner_id: new.owner_id,
            preserve: new.preserve,
            original_at: new.original_at,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        state
            .resources
            .insert(resource.id.clone(), resource.clone());
        Ok(resource)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>> {
        Ok(self
            .read()
            .resources
            .get(id)
            .filter(|r| !r.is_deleted())
            .cloned())
    }

    async fn find_by_id_with_trashed(&self, id: &str) -> Result<Option<Resource>> {
        Ok(self.find_with_trashed(id))
    }

    async fn find_many(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let state = self.read();
        Ok(sorted(
            ids.iter()
                .filter_map(|id| state.resources.get(id))
                .filter(|r| !r.is_deleted())
                .cloned()
                .collect(),
        ))
    }

    async fn find_one_by(&self, filter: &ResourceFilter) -> Result<Option<Resource>> {
        let state = self.read();
        let matches = state
            .resources
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(sorted(matches).into_iter().next())
    }

    async fn update(&self, id: &str, changes: ResourceChanges) -> Result<()> {
        let mut state = self.write();
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| ResourceError::resource_not_found(id))?;

        if let Some(checksum) = changes.checksum {
            resource.checksum = Some(checksum);
        }
        if let Some(size) = changes.size {
            resource.size = size;
        }
        if let Some(preserve) = changes.preserve {
            resource.preserve = preserve;
        }
        if let Some(owner_id) = changes.owner_id {
            resource.owner_id = Some(owner_id);
        }
        resource.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_soft(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let mut state = self.write();
        let now = Utc::now();
        let mut deleted = Vec::new();

        for id in ids {
            if let Some(resource) = state.resources.get_mut(id) {
                if !resource.is_deleted() {
                    resource.deleted_at = Some(now);
                    resource.updated_at = now;
                    deleted.push(resource.clone());
                }
            }
        }

        Ok(deleted)
    }

    async fn restore(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let mut state = self.write();
        let mut restored = Vec::new();

        for id in ids {
            if let Some(resource) = state.resources.get_mut(id) {
                if resource.is_deleted() {
                    resource.deleted_at = None;
                    resource.updated_at = Utc::now();
                    restored.push(resource.clone());
                }
            }
        }

        Ok(restored)
    }

    async fn force_delete(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let mut state = self.write();
        let mut deleted = Vec::new();

        for id in ids {
            state.translations.remove(id);
            if let Some(resource) = state.resources.remove(id) {
                deleted.push(resource);
            }
        }

        Ok(deleted)
    }

    async fn list_paginated(
        &self,
        filter: &ResourceFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Resource>> {
        let page = page.max(1);
        let state = self.read();
        let mut matches = sorted(
            state
                .resources
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect(),
        );
        matches.reverse();

        let total = matches.len() as i64;
        let offset = usize::try_from(page_offset(page, per_page)).unwrap_or(usize::MAX);
        let items = matches
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .collect();

        Ok(Page {
            items,
            page,
            per_page,
            total,
        })
    }

    async fn translations(&self, resource_id: &str) -> Result<Vec<ResourceTranslation>> {
        Ok(self
            .read()
            .translations
            .get(resource_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_translation(&self, translation: ResourceTranslation) -> Result<()> {
        let mut state = self.write();
        if !state.resources.contains_key(&translation.resource_id) {
            return Err(ResourceError::resource_not_found(&translation.resource_id));
        }

        let rows = state
            .translations
            .entry(translation.resource_id.clone())
            .or_default();
        rows.retain(|t| t.language != translation.language);
        rows.push(translation);
        Ok(())
    }
}

#[async_trait]
impl ThumbnailRepository for InMemoryRepository {
    async fn find_thumbnail(&self, id: &str) -> Result<Option<ThumbnailDefinition>> {
        Ok(self.read().thumbnails.get(id).cloned())
    }

    async fn find_thumbnails(&self, ids: &[String]) -> Result<Vec<ThumbnailDefinition>> {
        let state = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.thumbnails.get(id))
            .cloned()
            .collect())
    }

    async fn upsert_thumbnail(&self, thumbnail: ThumbnailDefinition) -> Result<()> {
        self.write()
            .thumbnails
            .insert(thumbnail.id.clone(), thumbnail);
        Ok(())
    }
}

#[async_trait]
impl GrabPropertyRepository for InMemoryRepository {
    async fn find_grab(&self, key: &GrabKey) -> Result<Option<GrabProperty>> {
        Ok(self.read().grabs.get(key).cloned())
    }

    async fn create_grab(&self, input: &GrabInput) -> Result<GrabProperty> {
        let mut state = self.write();
        let key = input.key();

        if state.grabs.contains_key(&key) {
            return Err(ResourceError::Repository(format!(
                "grab property already exists for resource {} thumbnail {}",
                input.resource_id, input.thumbnail_id
            )));
        }

        let now = Utc::now();
        let grab = GrabProperty {
            id: Uuid::new_v4().to_string(),
            resource_id: input.resource_id.clone(),
            thumbnail_id: input.thumbnail_id.clone(),
            source_type: input.source_type.clone(),
            source_id: input.source_id.clone(),
            x: input.x,
            y: input.y,
            zoom: input.zoom,
            created_at: now,
            updated_at: now,
        };

        state.grabs.insert(key, grab.clone());
        Ok(grab)
    }

    async fn update_grab(&self, input: &GrabInput) -> Result<()> {
        let mut state = self.write();
        let grab = state.grabs.get_mut(&input.key()).ok_or_else(|| {
            ResourceError::NotFound {
                kind: "GrabProperty",
                id: format!("{}/{}", input.resource_id, input.thumbnail_id),
            }
        })?;

        grab.x = input.x;
        grab.y = input.y;
        grab.zoom = input.zoom;
        grab.updated_at = Utc::now();
        Ok(())
    }
}
