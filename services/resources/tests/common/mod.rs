#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use resource_service::config::{DownloadConfig, PreviewDefinition, ResourcesConfig};
use resource_service::error::{ResourceError, Result};
use resource_service::jobs::JobReceiver;
use resource_service::model::{NewResource, Page, ResourceChanges, ResourceTranslation};
use resource_service::{
    Disks, InMemoryRepository, InProcessJobQueue, IngestionService, JobQueue, LocalDisk,
    ObjectStorage, Resource, ResourceFilter, ResourceRepository,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Two local disks under a temp dir plus an in-memory repository
pub struct Harness {
    pub root: TempDir,
    pub repository: Arc<InMemoryRepository>,
    pub local: Arc<FlakyDisk>,
    pub public: Arc<FlakyDisk>,
    pub queue: Arc<dyn JobQueue>,
    pub receiver: JobReceiver,
}

impl Harness {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let local = Arc::new(FlakyDisk::new(LocalDisk::new(
            "local",
            root.path().join("local"),
        )));
        let public = Arc::new(FlakyDisk::new(LocalDisk::new(
            "public",
            root.path().join("public"),
        )));
        let (queue, receiver) = InProcessJobQueue::new();

        Self {
            root,
            repository: Arc::new(InMemoryRepository::new()),
            local,
            public,
            queue: Arc::new(queue),
            receiver,
        }
    }

    pub fn disks(&self) -> Disks {
        Disks::new()
            .with_disk(self.local.clone())
            .with_disk(self.public.clone())
    }

    pub fn ingestion(&self, config: ResourcesConfig) -> IngestionService {
        self.ingestion_with(self.repository.clone(), config)
    }

    pub fn ingestion_with(
        &self,
        repository: Arc<dyn ResourceRepository>,
        config: ResourcesConfig,
    ) -> IngestionService {
        let download = DownloadConfig {
            scratch_dir: self.root.path().join("scratch"),
            retry_delay_ms: 1,
            ..Default::default()
        };

        IngestionService::new(
            repository,
            self.disks(),
            self.queue.clone(),
            config,
            download,
        )
        .unwrap()
    }
}

/// Local disk whose writes can be switched to fail
pub struct FlakyDisk {
    inner: LocalDisk,
    fail_writes: AtomicBool,
}

impl FlakyDisk {
    pub fn new(inner: LocalDisk) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStorage for FlakyDisk {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, bytes: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ResourceError::StorageWrite {
                disk: self.name().to_string(),
                path: path.to_string(),
                message: "disk full".to_string(),
            });
        }
        self.inner.write(path, bytes).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path).await
    }

    async fn size(&self, path: &str) -> Result<u64> {
        self.inner.size(path).await
    }

    fn url_for(&self, path: &str) -> Option<String> {
        self.inner.url_for(path)
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        self.inner.make_directory(path).await
    }
}

/// Repository that refuses every insert and delegates everything else
pub struct RejectingRepository {
    inner: Arc<InMemoryRepository>,
}

impl RejectingRepository {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ResourceRepository for RejectingRepository {
    async fn create(&self, resource: NewResource) -> Result<Resource> {
        Err(ResourceError::Repository(format!(
            "insert rejected: {}",
            resource.id
        )))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_id_with_trashed(&self, id: &str) -> Result<Option<Resource>> {
        self.inner.find_by_id_with_trashed(id).await
    }

    async fn find_many(&self, ids: &[String]) -> Result<Vec<Resource>> {
        self.inner.find_many(ids).await
    }

    async fn find_one_by(&self, filter: &ResourceFilter) -> Result<Option<Resource>> {
        self.inner.find_one_by(filter).await
    }

    async fn update(&self, id: &str, changes: ResourceChanges) -> Result<()> {
        self.inner.update(id, changes).await
    }

    async fn delete_soft(&self, ids: &[String]) -> Result<Vec<Resource>> {
        self.inner.delete_soft(ids).await
    }

    async fn restore(&self, ids: &[String]) -> Result<Vec<Resource>> {
        self.inner.restore(ids).await
    }

    async fn force_delete(&self, ids: &[String]) -> Result<Vec<Resource>> {
        self.inner.force_delete(ids).await
    }

    async fn list_paginated(
        &self,
        filter: &ResourceFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Resource>> {
        self.inner.list_paginated(filter, page, per_page).await
    }

    async fn translations(&self, resource_id: &str) -> Result<Vec<ResourceTranslation>> {
        self.inner.translations(resource_id).await
    }

    async fn save_translation(&self, translation: ResourceTranslation) -> Result<()> {
        self.inner.save_translation(translation).await
    }
}

/// Record for a file on `disk` that was never written through ingestion
pub fn record_on(disk: &str, id: &str, extension: &str, mime_type: &str) -> NewResource {
    NewResource {
        id: id.to_string(),
        disk: disk.to_string(),
        path: format!("uploads/2024-01-15/{id}{extension}"),
        extension: extension.to_string(),
        original_name: format!("{id}{extension}"),
        safe_name: format!("{id}{extension}"),
        mime_type: mime_type.to_string(),
        size: 0,
        uploaded_by: None,
        owner_id: None,
        preserve: false,
        original_at: None,
    }
}

/// Regular files under `dir`, recursively
pub fn file_count(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                file_count(&path)
            } else {
                1
            }
        })
        .sum()
}

/// Gradient image encoded in `format`
pub fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    Bytes::from(out.into_inner())
}

pub fn png(width: u32, height: u32) -> Bytes {
    image_bytes(width, height, ImageFormat::Png)
}

pub fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}

pub fn preview(width: u32, height: u32, generate: bool, default: bool) -> PreviewDefinition {
    PreviewDefinition {
        width,
        height,
        quality: 80,
        generate,
        default,
    }
}
