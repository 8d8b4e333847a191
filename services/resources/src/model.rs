use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Resource {
    /// Opaque identifier, caller supplied or UUID v4
    pub id: String,
    /// Logical storage backend name
    pub disk: String,
    /// Object path on the disk
    pub path: String,
    /// Extension including the leading dot
    pub extension: String,
    /// File name as reported by the client
    pub original_name: String,
    /// `id + extension`
    pub safe_name: String,
    pub mime_type: String,
    /// Size in bytes
    pub size: i64,
    /// SHA-256 hex digest, only present for files under the checksum threshold
    pub checksum: Option<String>,
    pub uploaded_by: Option<String>,
    pub owner_id: Option<String>,
    /// Exempt from being returned as a duplicate match
    pub preserve: bool,
    /// Source timestamp reported by the client
    pub original_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_video(&self) -> bool {
        self.mime_type == "video/mp4"
    }
}

/// Fields for a resource record that is about to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub id: String,
    pub disk: String,
    pub path: String,
    pub extension: String,
    pub original_name: String,
    pub safe_name: String,
    pub mime_type: String,
    pub size: i64,
    pub uploaded_by: Option<String>,
    pub owner_id: Option<String>,
    pub preserve: bool,
    pub original_at: Option<DateTime<Utc>>,
}

/// Partial update of a resource record. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceChanges {
    pub checksum: Option<String>,
    pub size: Option<i64>,
    pub preserve: Option<bool>,
    pub owner_id: Option<String>,
}

/// Filter used by `find_one_by` and the paginated listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceFilter {
    pub checksum: Option<String>,
    pub preserve: Option<bool>,
    pub owner_id: Option<String>,
    pub disk: Option<String>,
    pub mime_type: Option<String>,
    /// Case-insensitive match on the original name
    pub search: Option<String>,
    /// Include soft-deleted records
    #[serde(default)]
    pub with_trashed: bool,
}

impl ResourceFilter {
    pub fn by_checksum(checksum: impl Into<String>) -> Self {
        Self {
            checksum: Some(checksum.into()),
            ..Default::default()
        }
    }

    /// Whether a record satisfies the filter
    pub fn matches(&self, resource: &Resource) -> bool {
        if !self.with_trashed && resource.is_deleted() {
            return false;
        }
        if let Some(ref checksum) = self.checksum {
            if resource.checksum.as_ref() != Some(checksum) {
                return false;
            }
        }
        if let Some(preserve) = self.preserve {
            if resource.preserve != preserve {
                return false;
            }
        }
        if let Some(ref owner_id) = self.owner_id {
            if resource.owner_id.as_ref() != Some(owner_id) {
                return false;
            }
        }
        if let Some(ref disk) = self.disk {
            if &resource.disk != disk {
                return false;
            }
        }
        if let Some(ref mime_type) = self.mime_type {
            if &resource.mime_type != mime_type {
                return false;
            }
        }
        if let Some(ref search) = self.search {
            if !resource
                .original_name
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        (self.page as i64) * (self.per_page as i64) < self.total
    }
}

/// Translated metadata attached to a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ResourceTranslation {
    pub resource_id: String,
    pub language: String,
    pub label: Option<String>,
    pub caption: Option<String>,
    pub alt_text: Option<String>,
}

/// Named thumbnail size, managed outside the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ThumbnailDefinition {
    pub id: String,
    pub width: i32,
    pub height: i32,
    pub fit: bool,
    /// Whether focal-point cropping applies
    pub grab_enabled: bool,
    pub description: Option<String>,
}

/// Identity of a focal-point binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrabKey {
    pub resource_id: String,
    pub thumbnail_id: String,
    pub source_type: String,
    pub source_id: String,
}

/// Incoming focal-point tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrabInput {
    pub resource_id: String,
    pub thumbnail_id: String,
    pub source_type: String,
    pub source_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub zoom: Option<f64>,
}

impl GrabInput {
    pub fn key(&self) -> GrabKey {
        GrabKey {
            resource_id: self.resource_id.clone(),
            thumbnail_id: self.thumbnail_id.clone(),
            source_type: self.source_type.clone(),
            source_id: self.source_id.clone(),
        }
    }
}

/// Persisted focal-point binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GrabProperty {
    pub id: String,
    pub resource_id: String,
    pub thumbnail_id: String,
    pub source_type: String,
    pub source_id: String,
    pub x: f64,
    pub y: f64,
    pub zoom: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GrabProperty {
    /// Whether the stored anchor differs from the incoming one
    pub fn position_changed(&self, input: &GrabInput) -> bool {
        self.x != input.x || self.y != input.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resource(id: &str) -> Resource {
        let now = Utc::now();
        Resource {
            id: id.to_string(),
            disk: "local".to_string(),
            path: format!("uploads/2024-01-15/{id}.jpg"),
            extension: ".jpg".to_string(),
            original_name: "Holiday Photo.jpg".to_string(),
            safe_name: format!("{id}.jpg"),
            mime_type: "image/jpeg".to_string(),
            size: 100,
            checksum: Some("abc".to_string()),
            uploaded_by: None,
            owner_id: Some("owner-1".to_string()),
            preserve: false,
            original_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_filter_excludes_trashed_by_default() {
        let mut resource = sample_resource("r1");
        resource.deleted_at = Some(Utc::now());

        assert!(!ResourceFilter::default().matches(&resource));
        assert!(ResourceFilter {
            with_trashed: true,
            ..Default::default()
        }
        .matches(&resource));
    }

    #[test]
    fn test_filter_checksum_and_preserve() {
        let resource = sample_resource("r1");
        let filter = ResourceFilter {
            preserve: Some(false),
            ..ResourceFilter::by_checksum("abc")
        };
        assert!(filter.matches(&resource));

        let filter = ResourceFilter {
            preserve: Some(true),
            ..ResourceFilter::by_checksum("abc")
        };
        assert!(!filter.matches(&resource));
        assert!(!ResourceFilter::by_checksum("other").matches(&resource));
    }

    #[test]
    fn test_filter_search_is_case_insensitive() {
        let resource = sample_resource("r1");
        let filter = ResourceFilter {
            search: Some("holiday".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&resource));
    }

    #[test]
    fn test_grab_position_changed() {
        let now = Utc::now();
        let stored = GrabProperty {
            id: "g1".to_string(),
            resource_id: "r1".to_string(),
            thumbnail_id: "t1".to_string(),
            source_type: "article".to_string(),
            source_id: "a1".to_string(),
            x: 10.0,
            y: 20.0,
            zoom: Some(1.0),
            created_at: now,
            updated_at: now,
        };
        let mut input = GrabInput {
            resource_id: "r1".to_string(),
            thumbnail_id: "t1".to_string(),
            source_type: "article".to_string(),
            source_id: "a1".to_string(),
            x: 10.0,
            y: 20.0,
            zoom: Some(2.0),
        };

        // zoom alone never triggers regeneration
        assert!(!stored.position_changed(&input));

        input.y = 21.0;
        assert!(stored.position_changed(&input));
    }

    #[test]
    fn test_page_has_more() {
        let page: Page<u8> = Page {
            items: vec![],
            page: 1,
            per_page: 10,
            total: 25,
        };
        assert!(page.has_more());

        let last: Page<u8> = Page {
            items: vec![],
            page: 3,
            per_page: 10,
            total: 25,
        };
        assert!(!last.has_more());
    }
}
