//! Request-time serving of originals and derivatives.
//!
//! A derivative exists when its cache path exists on the resource's disk. On a
//! miss it is generated synchronously and written back; concurrent misses may
//! both generate and the last write wins. Once the record is found, reads never
//! hard-fail: a missing source, a broken source or a storage error serves a
//! placeholder instead, and a failed cache write still serves the generated body.

use crate::cache_path::CachePathResolver;
use crate::config::{Placeholders, DEFAULT_MAX_DERIVATIVE_DIMENSION};
use crate::error::{ResourceError, Result};
use crate::image_ops::{format_for_extension, run_blocking, ImageDerivativeGenerator};
use crate::ingestion::{normalize_mime, slugify};
use crate::model::Resource;
use crate::repository::ResourceRepository;
use crate::storage::{Disks, ObjectStorage};
use crate::video::{Rotation, VideoFrameSampler};
use bytes::Bytes;
use image::ImageFormat;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// MIME types resized on request
const RESIZABLE_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

/// Placeholder MIME type
const PLACEHOLDER_MIME: &str = "image/svg+xml";

/// Body and headers of a served file
#[derive(Debug, Clone, PartialEq)]
pub struct ServedArtifact {
    pub body: Bytes,
    pub content_type: String,
    pub content_length: u64,
    /// Suggested download name
    pub file_name: String,
    /// Whether the body is a not-found placeholder
    pub placeholder: bool,
}

impl ServedArtifact {
    fn new(body: Bytes, content_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            content_length: body.len() as u64,
            body,
            content_type: content_type.into(),
            file_name: file_name.into(),
            placeholder: false,
        }
    }
}

/// Placeholder family for a MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    Image,
    Video,
    File,
}

impl PlaceholderKind {
    pub fn for_mime(mime_type: &str) -> Self {
        match mime_type {
            "video/mp4" => Self::Video,
            "text/plain" | "application/pdf" | "application/octet-stream" => Self::File,
            _ => Self::Image,
        }
    }
}

pub struct DerivativeService {
    repository: Arc<dyn ResourceRepository>,
    disks: Disks,
    images: ImageDerivativeGenerator,
    video: VideoFrameSampler,
    resolver: CachePathResolver,
    placeholders: Placeholders,
    cache_quality: u8,
    max_dimension: u32,
}

impl DerivativeService {
    pub fn new(
        repository: Arc<dyn ResourceRepository>,
        disks: Disks,
        video: VideoFrameSampler,
        placeholders: Placeholders,
        cache_quality: u8,
    ) -> Self {
        Self {
            repository,
            disks,
            images: ImageDerivativeGenerator::new(),
            video,
            resolver: CachePathResolver::new(),
            placeholders,
            cache_quality,
            max_dimension: DEFAULT_MAX_DERIVATIVE_DIMENSION,
        }
    }

    /// Largest width or height a derivative may be requested at
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Serve the original, or the `width x height` derivative when both are non-zero
    #[instrument(skip(self))]
    pub async fn show(&self, id: &str, width: u32, height: u32, fit: bool) -> Result<ServedArtifact> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(ResourceError::InvalidInput(format!(
                "Requested size {width}x{height} exceeds the {max} pixel limit",
                max = self.max_dimension
            )));
        }

        let resource = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ResourceError::resource_not_found(id))?;

        match self.serve(&resource, width, height, fit).await {
            Ok(artifact) => Ok(artifact),
            Err(e @ ResourceError::DerivativeGeneration(_)) => {
                error!(resource_id = %id, error = %e, "Derivative generation failed");
                Ok(self.placeholder(PlaceholderKind::Image))
            }
            Err(e) => {
                error!(resource_id = %id, error = %e, "Serving failed, using placeholder");
                Ok(self.placeholder(PlaceholderKind::for_mime(&resource.mime_type)))
            }
        }
    }

    async fn serve(
        &self,
        resource: &Resource,
        width: u32,
        height: u32,
        fit: bool,
    ) -> Result<ServedArtifact> {
        let disk = self.disks.disk(&resource.disk)?;

        if !disk.exists(&resource.path).await? {
            warn!(resource_id = %resource.id, path = %resource.path, "Original missing, serving placeholder");
            return Ok(self.placeholder(PlaceholderKind::for_mime(&resource.mime_type)));
        }

        let sized = width > 0 && height > 0;
        let mime_type = normalize_mime(&resource.mime_type, &resource.original_name);

        if sized && RESIZABLE_MIME_TYPES.contains(&mime_type.as_str()) {
            self.image_derivative(disk.as_ref(), resource, width, height, fit)
                .await
        } else if sized && resource.is_video() {
            self.video_derivative(disk.as_ref(), resource, width, height, fit)
                .await
        } else {
            let body = disk.read(&resource.path).await?;
            Ok(ServedArtifact::new(body, mime_type, download_name(resource, None)))
        }
    }

    async fn image_derivative(
        &self,
        disk: &dyn ObjectStorage,
        resource: &Resource,
        width: u32,
        height: u32,
        fit: bool,
    ) -> Result<ServedArtifact> {
        let cache_path =
            self.resolver
                .resolve(&resource.id, width, height, fit, &resource.extension);
        let name = download_name(resource, None);

        if let Some(body) = self.cached(disk, &cache_path).await? {
            return Ok(ServedArtifact::new(body, resource.mime_type.clone(), name));
        }

        let source = disk.read(&resource.path).await?;
        let format = format_for_extension(&resource.extension);
        let body = self.generate(source, width, height, fit, format).await?;
        self.store_cached(disk, &cache_path, &body).await;

        Ok(ServedArtifact::new(body, resource.mime_type.clone(), name))
    }

    async fn video_derivative(
        &self,
        disk: &dyn ObjectStorage,
        resource: &Resource,
        width: u32,
        height: u32,
        fit: bool,
    ) -> Result<ServedArtifact> {
        let cache_path = self
            .resolver
            .resolve_video_frame(&resource.id, width, height, fit);
        let name = download_name(resource, Some(".jpg"));

        if let Some(body) = self.cached(disk, &cache_path).await? {
            return Ok(ServedArtifact::new(body, "image/jpeg", name));
        }

        let frame_path = self.video.ensure_preview(disk, resource).await?;
        let frame = disk.read(&frame_path).await?;
        let body = self
            .generate(frame, width, height, fit, ImageFormat::Jpeg)
            .await?;
        self.store_cached(disk, &cache_path, &body).await;

        Ok(ServedArtifact::new(body, "image/jpeg", name))
    }

    /// Write-back is best effort; the generated body is served either way
    async fn store_cached(&self, disk: &dyn ObjectStorage, path: &str, body: &Bytes) {
        metrics::counter!("resources.derivatives.generated").increment(1);

        match disk.write(path, body.clone()).await {
            Ok(()) => debug!(path = %path, "Derivative cached"),
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to cache derivative");
                metrics::counter!("resources.derivatives.cache_write_failed").increment(1);
            }
        }
    }

    async fn cached(&self, disk: &dyn ObjectStorage, path: &str) -> Result<Option<Bytes>> {
        if !disk.exists(path).await? {
            return Ok(None);
        }

        metrics::counter!("resources.derivatives.cache_hit").increment(1);
        disk.read(path).await.map(Some)
    }

    async fn generate(
        &self,
        source: Bytes,
        width: u32,
        height: u32,
        fit: bool,
        format: ImageFormat,
    ) -> Result<Bytes> {
        let images = self.images;
        let quality = self.cache_quality;

        let body = run_blocking(move || {
            images.resize(&source, Some(width), Some(height), fit, format, quality)
        })
        .await?;

        Ok(Bytes::from(body))
    }

    /// Serve a rotated transcode of a video, producing it on first request
    #[instrument(skip(self))]
    pub async fn show_rotated_video(&self, id: &str, angle: u16) -> Result<ServedArtifact> {
        let resource = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ResourceError::resource_not_found(id))?;

        if !resource.is_video() {
            return Err(ResourceError::InvalidInput(format!(
                "Resource {id} is not a video"
            )));
        }

        let rotation = Rotation::parse(angle).ok_or_else(|| {
            ResourceError::InvalidInput(format!("Unsupported rotation angle: {angle}"))
        })?;

        match self.serve_rotated(&resource, rotation).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                error!(resource_id = %id, error = %e, "Rotation failed");
                Ok(self.placeholder(PlaceholderKind::Video))
            }
        }
    }

    async fn serve_rotated(&self, resource: &Resource, rotation: Rotation) -> Result<ServedArtifact> {
        let disk = self.disks.disk(&resource.disk)?;

        if !disk.exists(&resource.path).await? {
            return Ok(self.placeholder(PlaceholderKind::Video));
        }

        let rotated = self.video.rotate(disk.as_ref(), resource, rotation).await?;
        let body = disk.read(&rotated).await?;
        Ok(ServedArtifact::new(
            body,
            resource.mime_type.clone(),
            download_name(resource, None),
        ))
    }

    pub fn placeholder(&self, kind: PlaceholderKind) -> ServedArtifact {
        let (svg, name) = match kind {
            PlaceholderKind::Image => (&self.placeholders.image, "image-not-found.svg"),
            PlaceholderKind::Video => (&self.placeholders.video, "video-not-found.svg"),
            PlaceholderKind::File => (&self.placeholders.file, "file-not-found.svg"),
        };

        metrics::counter!("resources.derivatives.placeholder").increment(1);

        ServedArtifact {
            placeholder: true,
            ..ServedArtifact::new(Bytes::from(svg.clone()), PLACEHOLDER_MIME, name)
        }
    }
}

/// Slug of the original name's stem plus an extension
fn download_name(resource: &Resource, extension: Option<&str>) -> String {
    let stem = resource
        .original_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(&resource.original_name);

    let stem = match slugify(stem) {
        s if s.is_empty() => resource.id.clone(),
        s => s,
    };

    format!("{}{}", stem, extension.unwrap_or(&resource.extension))
}
