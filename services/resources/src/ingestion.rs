//! Upload and download orchestration.
//!
//! An upload either completes fully (object written, record created, checksum
//! stored, previews produced or queued) or is unwound: the object and the
//! previews this attempt wrote are deleted and the record it created is
//! force-deleted before the original error is returned.

use crate::cache_path::CachePathResolver;
use crate::checksum::ChecksumIndex;
use crate::config::{DownloadConfig, PreviewDefinition, ResourcesConfig};
use crate::error::{ResourceError, Result};
use crate::image_ops::{format_for_extension, run_blocking, ImageDerivativeGenerator};
use crate::jobs::{Job, JobQueue};
use crate::model::{NewResource, Page, Resource, ResourceChanges, ResourceFilter};
use crate::repository::ResourceRepository;
use crate::storage::{Disks, ObjectStorage};
use crate::video::Rotation;
use backoff::backoff::{Backoff, Constant};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Uploads whose MIME type gets preview thumbnails and original resizing
pub const PREVIEWABLE_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/gif"];

/// An incoming file
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Content as uploaded. Checksumming and its size limit apply to these
    /// bytes even when the stored original is resized.
    pub bytes: Bytes,
    /// File name as reported by the client
    pub original_name: String,
    /// MIME type as reported by the client
    pub mime_type: String,
    pub original_at: Option<DateTime<Utc>>,
    pub owner_id: Option<String>,
    pub uploaded_by: Option<String>,
    /// Overrides the configured upload disk
    pub disk: Option<String>,
    /// Caller supplied id; a UUID v4 is generated otherwise
    pub custom_id: Option<String>,
    /// Preview sizes requested in `{width}x{height}` form
    pub preview_sizes: Vec<String>,
    pub preserve: bool,
    /// Overrides the configured duplicate policy
    pub allow_duplicates: Option<bool>,
    /// Day bucket of the storage path; today (UTC) when absent
    pub upload_date: Option<NaiveDate>,
}

impl UploadRequest {
    pub fn new(
        bytes: impl Into<Bytes>,
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            original_at: None,
            owner_id: None,
            uploaded_by: None,
            disk: None,
            custom_id: None,
            preview_sizes: Vec::new(),
            preserve: false,
            allow_duplicates: None,
            upload_date: None,
        }
    }

    pub fn with_custom_id(mut self, id: impl Into<String>) -> Self {
        self.custom_id = Some(id.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_disk(mut self, disk: impl Into<String>) -> Self {
        self.disk = Some(disk.into());
        self
    }

    pub fn with_preserve(mut self, preserve: bool) -> Self {
        self.preserve = preserve;
        self
    }

    pub fn with_allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = Some(allow);
        self
    }

    pub fn with_preview_sizes(mut self, sizes: Vec<String>) -> Self {
        self.preview_sizes = sizes;
        self
    }

    pub fn with_upload_date(mut self, date: NaiveDate) -> Self {
        self.upload_date = Some(date);
        self
    }

    pub fn with_original_at(mut self, at: DateTime<Utc>) -> Self {
        self.original_at = Some(at);
        self
    }
}

/// A remote file to ingest
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub custom_id: Option<String>,
    /// Used instead of the response Content-Type
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub disk: Option<String>,
    #[serde(default)]
    pub allow_duplicates: Option<bool>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Result of a successful ingestion
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new record was stored
    Created(Resource),
    /// Identical content was already stored; nothing was written
    DuplicateSkipped(Resource),
}

impl IngestOutcome {
    pub fn resource(&self) -> &Resource {
        match self {
            Self::Created(resource) | Self::DuplicateSkipped(resource) => resource,
        }
    }

    pub fn into_resource(self) -> Resource {
        match self {
            Self::Created(resource) | Self::DuplicateSkipped(resource) => resource,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateSkipped(_))
    }
}

/// Upload, download and lifecycle operations on resources
pub struct IngestionService {
    repository: Arc<dyn ResourceRepository>,
    disks: Disks,
    checksums: ChecksumIndex,
    images: ImageDerivativeGenerator,
    queue: Arc<dyn JobQueue>,
    resolver: CachePathResolver,
    config: ResourcesConfig,
    download: DownloadConfig,
    http: reqwest::Client,
}

impl IngestionService {
    pub fn new(
        repository: Arc<dyn ResourceRepository>,
        disks: Disks,
        queue: Arc<dyn JobQueue>,
        config: ResourcesConfig,
        download: DownloadConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(download.request_timeout())
            .build()
            .map_err(|e| ResourceError::InvalidInput(format!("Invalid HTTP client setup: {e}")))?;

        Ok(Self {
            checksums: ChecksumIndex::new(repository.clone(), config.max_checksum_size),
            repository,
            disks,
            images: ImageDerivativeGenerator::new(),
            queue,
            resolver: CachePathResolver::new(),
            config,
            download,
            http,
        })
    }

    pub fn checksums(&self) -> &ChecksumIndex {
        &self.checksums
    }

    /// Store a file and create its record
    #[instrument(skip(self, request), fields(original_name = %request.original_name, size_bytes = request.bytes.len()))]
    pub async fn upload(&self, request: UploadRequest) -> Result<IngestOutcome> {
        let mime_type = normalize_mime(&request.mime_type, &request.original_name);
        let allow_duplicates = request
            .allow_duplicates
            .unwrap_or(self.config.allow_duplicates);

        // Digest of the bytes as uploaded, so re-uploads match even when the original is resized
        let checksum = self.checksums.checksum_for(&request.bytes);

        if !allow_duplicates && !request.preserve {
            if let Some(ref digest) = checksum {
                if let Some(existing) = self.checksums.find_by_checksum(digest).await? {
                    info!(resource_id = %existing.id, "Duplicate upload skipped");
                    metrics::counter!("resources.uploads.duplicate").increment(1);
                    return Ok(IngestOutcome::DuplicateSkipped(existing));
                }
            }
        }

        let id = request
            .custom_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Soft-deleted records still own their id, path and previews
        if let Some(ref custom_id) = request.custom_id {
            if self
                .repository
                .find_by_id_with_trashed(custom_id)
                .await?
                .is_some()
            {
                return Err(ResourceError::InvalidInput(format!(
                    "Resource id already exists: {custom_id}"
                )));
            }
        }

        let extension = extension_for(&request.original_name, &mime_type);
        let safe_name = format!("{id}{extension}");
        let date = request
            .upload_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let path = format!("{}/{}", upload_prefix(date), safe_name);

        let disk_name = request
            .disk
            .clone()
            .unwrap_or_else(|| self.config.upload_disk.clone());
        let disk = self.disks.disk(&disk_name)?;

        if disk.exists(&path).await? {
            return Err(ResourceError::InvalidInput(format!(
                "Path already taken on disk {disk_name}: {path}"
            )));
        }

        let stored = self
            .maybe_resize_original(request.bytes.clone(), &mime_type, &extension)
            .await;

        // Nothing to unwind when the write fails: storage writes are atomic-or-absent
        disk.write(&path, stored.clone()).await?;

        let new_resource = NewResource {
            id: id.clone(),
            disk: disk_name.clone(),
            path: path.clone(),
            extension,
            original_name: request.original_name.clone(),
            safe_name,
            mime_type,
            size: stored.len() as i64,
            uploaded_by: request.uploaded_by.clone(),
            owner_id: request.owner_id.clone(),
            preserve: request.preserve,
            original_at: request.original_at,
        };

        let resource = match self.repository.create(new_resource).await {
            Ok(resource) => resource,
            Err(e) => {
                self.compensate(disk.as_ref(), &path, &[], None).await;
                return Err(e);
            }
        };

        let mut previews_written = Vec::new();
        let finished = self
            .finish_upload(
                resource,
                checksum,
                &stored,
                &request.preview_sizes,
                &mut previews_written,
            )
            .await;

        match finished {
            Ok(resource) => {
                info!(resource_id = %resource.id, disk = %disk_name, path = %path, "Resource uploaded");
                metrics::counter!("resources.uploads.created").increment(1);
                Ok(IngestOutcome::Created(resource))
            }
            Err(e) => {
                error!(resource_id = %id, error = %e, "Upload failed, unwinding");
                self.compensate(disk.as_ref(), &path, &previews_written, Some(&id))
                    .await;
                Err(e)
            }
        }
    }

    /// Steps after the record exists; any failure here is compensated
    async fn finish_upload(
        &self,
        mut resource: Resource,
        checksum: Option<String>,
        stored: &Bytes,
        preview_sizes: &[String],
        previews_written: &mut Vec<String>,
    ) -> Result<Resource> {
        if let Some(digest) = checksum {
            self.repository
                .update(
                    &resource.id,
                    ResourceChanges {
                        checksum: Some(digest.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            resource.checksum = Some(digest);
        }

        if PREVIEWABLE_MIME_TYPES.contains(&resource.mime_type.as_str()) {
            self.create_upload_previews(&resource, stored, preview_sizes, previews_written)
                .await?;
        }

        Ok(resource)
    }

    /// Generate the `generate` definitions now and queue the rest
    async fn create_upload_previews(
        &self,
        resource: &Resource,
        stored: &Bytes,
        preview_sizes: &[String],
        previews_written: &mut Vec<String>,
    ) -> Result<()> {
        let selected: Vec<PreviewDefinition> = self
            .config
            .image_preview
            .iter()
            .filter(|d| d.default || preview_sizes.contains(&d.size_label()))
            .cloned()
            .collect();

        let (now, later): (Vec<_>, Vec<_>) = selected.into_iter().partition(|d| d.generate);

        if !now.is_empty() {
            self.write_preview_thumbnails(&resource.id, stored.clone(), &now, previews_written)
                .await?;
        }

        if !later.is_empty() {
            self.queue
                .enqueue(Job::PreviewThumbnails {
                    resource_id: resource.id.clone(),
                    disk: resource.disk.clone(),
                    path: resource.path.clone(),
                    definitions: later,
                })
                .await?;
        }

        Ok(())
    }

    /// Job entry point for deferred preview thumbnails
    #[instrument(skip(self, definitions))]
    pub async fn generate_preview_thumbnails(
        &self,
        resource_id: &str,
        disk: &str,
        path: &str,
        definitions: &[PreviewDefinition],
    ) -> Result<()> {
        let source = self.disks.disk(disk)?.read(path).await?;
        self.write_preview_thumbnails(resource_id, source, definitions, &mut Vec::new())
            .await
    }

    /// Paths are pushed onto `written` as each preview lands
    async fn write_preview_thumbnails(
        &self,
        resource_id: &str,
        source: Bytes,
        definitions: &[PreviewDefinition],
        written: &mut Vec<String>,
    ) -> Result<()> {
        let preview_disk = self.disks.disk(&self.config.preview_disk)?;

        for definition in definitions {
            let images = self.images;
            let bytes = source.clone();
            let (w, h, quality) = (definition.width, definition.height, definition.quality);

            let thumbnail = run_blocking(move || {
                images.crop_thumbnail(&bytes, w, h, w as f64 / 2.0, h as f64 / 2.0, quality)
            })
            .await?;

            let path = self.resolver.preview_thumbnail(resource_id, w, h);
            preview_disk.write(&path, Bytes::from(thumbnail)).await?;
            debug!(resource_id = %resource_id, path = %path, "Preview thumbnail written");
            written.push(path);
        }

        Ok(())
    }

    /// Shrink large images when `resize_original` is on; failures keep the upload as is
    async fn maybe_resize_original(&self, bytes: Bytes, mime_type: &str, extension: &str) -> Bytes {
        if !self.config.resize_original || !PREVIEWABLE_MIME_TYPES.contains(&mime_type) {
            return bytes;
        }

        let images = self.images;
        let dims = self.config.original_dimensions.clone();
        let format = format_for_extension(extension);
        let source = bytes.clone();

        let resized = run_blocking(move || {
            images.fit_within(&source, dims.width, dims.height, format, dims.quality)
        })
        .await;

        match resized {
            Ok(Some(smaller)) => {
                debug!(before = bytes.len(), after = smaller.len(), "Original resized");
                Bytes::from(smaller)
            }
            Ok(None) => bytes,
            Err(e) => {
                warn!(error = %e, "Original resize failed, storing upload unchanged");
                bytes
            }
        }
    }

    /// Undo a failed upload: only the objects this attempt wrote and, when
    /// given, the record it created. Errors are logged; the caller reports the
    /// original failure.
    async fn compensate(
        &self,
        disk: &dyn ObjectStorage,
        path: &str,
        previews_written: &[String],
        created_record: Option<&str>,
    ) {
        if let Err(e) = disk.delete(path).await {
            error!(path = %path, error = %e, "Compensation failed to delete object");
        }

        if !previews_written.is_empty() {
            match self.disks.disk(&self.config.preview_disk) {
                Ok(preview_disk) => {
                    for preview in previews_written {
                        if let Err(e) = preview_disk.delete(preview).await {
                            warn!(path = %preview, error = %e, "Compensation failed to delete preview");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Preview disk unavailable during compensation"),
            }
        }

        if let Some(resource_id) = created_record {
            if let Err(e) = self
                .repository
                .force_delete(&[resource_id.to_string()])
                .await
            {
                error!(resource_id = %resource_id, error = %e, "Compensation failed to delete record");
            }
        }

        metrics::counter!("resources.uploads.compensated").increment(1);
    }

    /// Fetch a remote file and ingest it.
    ///
    /// Returns `None` when no file name can be derived from the URL or headers.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn download(&self, request: DownloadRequest) -> Result<Option<IngestOutcome>> {
        if let Some(ref custom_id) = request.custom_id {
            if let Some(existing) = self.repository.find_by_id(custom_id).await? {
                debug!(resource_id = %custom_id, "Custom id already ingested");
                return Ok(Some(IngestOutcome::DuplicateSkipped(existing)));
            }
        }

        let response = self.fetch_with_retry(&request.url).await?;

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let file_name = disposition
            .as_deref()
            .and_then(file_name_from_disposition)
            .unwrap_or_else(|| file_name_from_url(&request.url));

        if file_name.is_empty() {
            warn!("No file name could be derived, skipping download");
            return Ok(None);
        }

        let response_mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let bytes = self.stream_to_scratch(&request.url, response).await?;

        let allow_duplicates = request
            .allow_duplicates
            .unwrap_or(self.config.allow_duplicates);

        if !allow_duplicates {
            if let Some(digest) = self.checksums.checksum_for(&bytes) {
                if let Some(existing) = self.checksums.find_by_checksum(&digest).await? {
                    info!(resource_id = %existing.id, "Downloaded file is a duplicate");
                    metrics::counter!("resources.uploads.duplicate").increment(1);
                    return Ok(Some(IngestOutcome::DuplicateSkipped(existing)));
                }
            }
        }

        let mime_type = request
            .mime_type
            .clone()
            .or(response_mime)
            .unwrap_or_else(|| mime_from_extension(&file_name).to_string());

        let mut upload = UploadRequest::new(bytes, file_name, mime_type)
            .with_allow_duplicates(allow_duplicates);
        upload.custom_id = request.custom_id;
        upload.owner_id = request.owner_id;
        upload.disk = request.disk;

        metrics::counter!("resources.downloads").increment(1);
        self.upload(upload).await.map(Some)
    }

    /// GET with a fixed delay between attempts on transport and server errors
    async fn fetch_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let max_attempts = self.download.max_retries + 1;
        let mut backoff = Constant::new(self.download.retry_delay());
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let failure = match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_client_error() => {
                    return Err(ResourceError::TransientFetch {
                        source_url: url.to_string(),
                        attempts,
                        message: format!("HTTP {}", response.status()),
                    });
                }
                Ok(response) => format!("HTTP {}", response.status()),
                Err(e) => e.to_string(),
            };

            if attempts >= max_attempts {
                error!(url = %url, attempts, error = %failure, "Download failed");
                return Err(ResourceError::TransientFetch {
                    source_url: url.to_string(),
                    attempts,
                    message: failure,
                });
            }

            if let Some(delay) = backoff.next_backoff() {
                warn!(
                    url = %url,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "Fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Stream the body into a scratch file, then load it; the file is removed on return
    async fn stream_to_scratch(&self, url: &str, response: reqwest::Response) -> Result<Bytes> {
        let scratch_error = |e: std::io::Error| {
            ResourceError::Storage(format!("Scratch file for {url} failed: {e}"))
        };

        tokio::fs::create_dir_all(&self.download.scratch_dir)
            .await
            .map_err(scratch_error)?;

        let scratch = tempfile::Builder::new()
            .prefix("download-")
            .tempfile_in(&self.download.scratch_dir)
            .map_err(scratch_error)?;

        let mut file = tokio::fs::File::from_std(scratch.reopen().map_err(scratch_error)?);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ResourceError::TransientFetch {
                source_url: url.to_string(),
                attempts: 1,
                message: e.to_string(),
            })?;
            file.write_all(&chunk).await.map_err(scratch_error)?;
        }
        file.flush().await.map_err(scratch_error)?;

        let data = tokio::fs::read(scratch.path())
            .await
            .map_err(scratch_error)?;

        debug!(size_bytes = data.len(), "Download buffered");
        Ok(Bytes::from(data))
    }

    pub async fn find(&self, id: &str) -> Result<Resource> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ResourceError::resource_not_found(id))
    }

    /// Soft delete; storage is kept
    #[instrument(skip(self))]
    pub async fn delete_soft(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let deleted = self.repository.delete_soft(ids).await?;
        info!(deleted_count = deleted.len(), "Resources soft deleted");
        Ok(deleted)
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let restored = self.repository.restore(ids).await?;
        info!(restored_count = restored.len(), "Resources restored");
        Ok(restored)
    }

    /// Remove records, translations, originals and every known derivative.
    ///
    /// Records are removed first. Storage cleanup then runs for every removed
    /// resource even when some of it fails; the failures are reported together
    /// once all resources have been visited.
    #[instrument(skip(self))]
    pub async fn force_delete(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let deleted = self.repository.force_delete(ids).await?;

        let mut failed = Vec::new();
        for resource in &deleted {
            match self.remove_storage(resource).await {
                Ok(()) => debug!(resource_id = %resource.id, "Resource storage removed"),
                Err(e) => {
                    error!(resource_id = %resource.id, error = %e, "Failed to remove resource storage");
                    failed.push(resource.id.clone());
                }
            }
        }

        metrics::counter!("resources.force_deleted").increment(deleted.len() as u64);
        info!(deleted_count = deleted.len(), "Resources force deleted");

        if !failed.is_empty() {
            metrics::counter!("resources.force_delete.storage_failures")
                .increment(failed.len() as u64);
            return Err(ResourceError::Storage(format!(
                "Records removed but storage cleanup failed for: {}",
                failed.join(", ")
            )));
        }

        Ok(deleted)
    }

    /// Delete the original and its derivatives, attempting every path before
    /// returning the first failure
    async fn remove_storage(&self, resource: &Resource) -> Result<()> {
        self.delete_preview_thumbnails(&resource.id).await;

        let disk = self.disks.disk(&resource.disk)?;

        let mut paths = vec![resource.path.clone()];
        if resource.is_video() {
            paths.push(self.resolver.video_preview_frame(&resource.id));
            for rotation in Rotation::all() {
                paths.push(self.resolver.rotated_video(&resource.id, rotation.degrees()));
            }
        }

        let mut first_error = None;
        for path in paths {
            if let Err(e) = disk.delete(&path).await {
                warn!(path = %path, error = %e, "Failed to delete object");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove the preview thumbnail of every configured size
    async fn delete_preview_thumbnails(&self, resource_id: &str) {
        let preview_disk = match self.disks.disk(&self.config.preview_disk) {
            Ok(disk) => disk,
            Err(e) => {
                warn!(error = %e, "Preview disk unavailable");
                return;
            }
        };

        for definition in &self.config.image_preview {
            let path = self
                .resolver
                .preview_thumbnail(resource_id, definition.width, definition.height);
            if let Err(e) = preview_disk.delete(&path).await {
                warn!(path = %path, error = %e, "Failed to delete preview thumbnail");
            }
        }
    }

    pub async fn list(
        &self,
        filter: &ResourceFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Resource>> {
        self.repository
            .list_paginated(filter, page, per_page)
            .await
    }
}

/// `uploads/YYYY-MM-DD`
pub fn upload_prefix(date: NaiveDate) -> String {
    format!("uploads/{}", date.format("%Y-%m-%d"))
}

/// Extension with its leading dot: the client's, else the MIME subtype
pub fn extension_for(original_name: &str, mime_type: &str) -> String {
    if let Some(ext) = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
    {
        return format!(".{}", ext.to_ascii_lowercase());
    }

    mime_type
        .split(';')
        .next()
        .and_then(|m| m.split('/').nth(1))
        .map(|subtype| format!(".{}", subtype.trim().to_ascii_lowercase()))
        .unwrap_or_default()
}

/// SVG files reported as `text/plain` or `image/svg` become `image/svg+xml`
pub fn normalize_mime(mime_type: &str, file_name: &str) -> String {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();
    let is_svg_name = file_name.to_ascii_lowercase().ends_with(".svg");

    if mime == "image/svg" || (mime == "text/plain" && is_svg_name) {
        "image/svg+xml".to_string()
    } else {
        mime
    }
}

fn mime_from_extension(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Lowercase ASCII slug with `-` separators
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// File name from a `Content-Disposition` header, when it names one with an extension
pub fn file_name_from_disposition(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let raw = rest.split(';').next()?.trim().trim_matches('"');
    let (stem, extension) = raw.rsplit_once('.')?;

    let stem = slugify(stem);
    let extension = slugify(extension);
    if stem.is_empty() || extension.is_empty() {
        return None;
    }

    Some(format!("{stem}.{extension}"))
}

/// File name from the last URL segment: query dropped, stem slugged, `.php` dropped
pub fn file_name_from_url(url: &str) -> String {
    let last = url.rsplit('/').next().unwrap_or(url);
    let name = last.split(['?', '#']).next().unwrap_or(last);

    match name.rsplit_once('.') {
        Some((stem, extension)) if !extension.eq_ignore_ascii_case("php") => {
            format!("{}.{}", slugify(stem), extension.to_ascii_lowercase())
        }
        Some((stem, _)) => slugify(stem),
        None => slugify(name),
    }
}
