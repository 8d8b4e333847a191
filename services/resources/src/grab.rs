//! Focal thumbnail scheduling over grab bindings.
//!
//! Each incoming tuple moves its binding through absent → created, present →
//! unchanged, or present → updated. Only the created and updated transitions
//! enqueue a render job, so replaying a batch does no extra work. The job is
//! enqueued before the binding is stored: a failed enqueue leaves the tuple
//! looking new, so the next replay schedules it again.

use crate::cache_path::CachePathResolver;
use crate::error::{ResourceError, Result};
use crate::image_ops::{run_blocking, ImageDerivativeGenerator};
use crate::jobs::{Job, JobQueue};
use crate::model::{GrabInput, Resource, ThumbnailDefinition};
use crate::repository::{GrabPropertyRepository, ResourceRepository, ThumbnailRepository};
use crate::storage::Disks;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What happened to one tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Per-batch counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrabBatchReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl GrabBatchReport {
    /// Number of render jobs enqueued
    pub fn scheduled(&self) -> usize {
        self.created + self.updated
    }
}

pub struct FocalThumbnailPipeline {
    resources: Arc<dyn ResourceRepository>,
    thumbnails: Arc<dyn ThumbnailRepository>,
    grabs: Arc<dyn GrabPropertyRepository>,
    disks: Disks,
    queue: Arc<dyn JobQueue>,
    images: ImageDerivativeGenerator,
    resolver: CachePathResolver,
    quality: u8,
}

impl FocalThumbnailPipeline {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        thumbnails: Arc<dyn ThumbnailRepository>,
        grabs: Arc<dyn GrabPropertyRepository>,
        disks: Disks,
        queue: Arc<dyn JobQueue>,
        quality: u8,
    ) -> Self {
        Self {
            resources,
            thumbnails,
            grabs,
            disks,
            queue,
            images: ImageDerivativeGenerator::new(),
            resolver: CachePathResolver::new(),
            quality,
        }
    }

    /// Apply a batch of focal-point tuples.
    ///
    /// Resources and thumbnail definitions are loaded once for the whole batch.
    /// A failing tuple is logged and counted as skipped.
    #[instrument(skip(self, batch), fields(batch_size = batch.len()))]
    pub async fn generate_thumbs(&self, batch: &[GrabInput]) -> Result<GrabBatchReport> {
        let resource_ids: Vec<String> = unique(batch.iter().map(|g| &g.resource_id));
        let thumbnail_ids: Vec<String> = unique(batch.iter().map(|g| &g.thumbnail_id));

        let resources: HashMap<String, Resource> = self
            .resources
            .find_many(&resource_ids)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let thumbnails: HashMap<String, ThumbnailDefinition> = self
            .thumbnails
            .find_thumbnails(&thumbnail_ids)
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        let mut report = GrabBatchReport::default();

        for input in batch {
            let resource = resources.get(&input.resource_id);
            let thumbnail = thumbnails.get(&input.thumbnail_id);

            match self.apply(input, resource, thumbnail).await {
                Ok(GrabOutcome::Created) => report.created += 1,
                Ok(GrabOutcome::Updated) => report.updated += 1,
                Ok(GrabOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    warn!(
                        resource_id = %input.resource_id,
                        thumbnail_id = %input.thumbnail_id,
                        error = %e,
                        "Grab tuple skipped"
                    );
                    report.skipped += 1;
                }
            }
        }

        metrics::counter!("resources.grabs.scheduled").increment(report.scheduled() as u64);
        info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "Grab batch applied"
        );

        Ok(report)
    }

    /// Lookup, decide and enqueue/update for one tuple
    async fn apply(
        &self,
        input: &GrabInput,
        resource: Option<&Resource>,
        thumbnail: Option<&ThumbnailDefinition>,
    ) -> Result<GrabOutcome> {
        let existing = self.grabs.find_grab(&input.key()).await?;

        if let Some(ref stored) = existing {
            if !stored.position_changed(input) {
                debug!(grab_id = %stored.id, "Focal point unchanged");
                return Ok(GrabOutcome::Unchanged);
            }
        }

        let resource = resource.ok_or_else(|| ResourceError::resource_not_found(&input.resource_id))?;
        let thumbnail =
            thumbnail.ok_or_else(|| ResourceError::thumbnail_not_found(&input.thumbnail_id))?;

        match existing {
            None => {
                self.enqueue(input, resource, thumbnail).await?;
                self.grabs.create_grab(input).await?;
                Ok(GrabOutcome::Created)
            }
            Some(_) => {
                self.enqueue(input, resource, thumbnail).await?;
                self.grabs.update_grab(input).await?;
                Ok(GrabOutcome::Updated)
            }
        }
    }

    async fn enqueue(
        &self,
        input: &GrabInput,
        resource: &Resource,
        thumbnail: &ThumbnailDefinition,
    ) -> Result<()> {
        self.queue
            .enqueue(Job::GrabThumbnail {
                grab: input.clone(),
                resource: resource.clone(),
                thumbnail: thumbnail.clone(),
            })
            .await
    }

    /// Job entry point: crop the original and store the thumbnail next to it
    #[instrument(skip_all, fields(resource_id = %resource.id, thumbnail_id = %thumbnail.id))]
    pub async fn render_thumbnail(
        &self,
        grab: &GrabInput,
        resource: &Resource,
        thumbnail: &ThumbnailDefinition,
    ) -> Result<String> {
        let (width, height) = match (u32::try_from(thumbnail.width), u32::try_from(thumbnail.height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(ResourceError::InvalidInput(format!(
                    "Thumbnail {} has invalid size {}x{}",
                    thumbnail.id, thumbnail.width, thumbnail.height
                )))
            }
        };

        let disk = self.disks.disk(&resource.disk)?;
        let source = disk.read(&resource.path).await?;

        let images = self.images;
        let quality = self.quality;
        let (x, y) = (grab.x, grab.y);
        let rendered = run_blocking(move || {
            images.crop_thumbnail(&source, width, height, x, y, quality)
        })
        .await?;

        let path = self.resolver.focal_thumbnail(&resource.id, &thumbnail.id);
        disk.write(&path, Bytes::from(rendered)).await?;

        metrics::counter!("resources.grabs.rendered").increment(1);
        debug!(path = %path, "Focal thumbnail written");
        Ok(path)
    }
}

fn unique<'a>(ids: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InProcessJobQueue;
    use crate::model::{GrabKey, NewResource};
    use crate::repository::InMemoryRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Rejects its first job, then forwards to the wrapped queue
    struct FailsFirstEnqueue {
        inner: InProcessJobQueue,
        failed: AtomicBool,
    }

    #[async_trait]
    impl JobQueue for FailsFirstEnqueue {
        async fn enqueue(&self, job: Job) -> Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(ResourceError::Queue("broker unavailable".to_string()));
            }
            self.inner.enqueue(job).await
        }
    }

    fn grab(x: f64, y: f64) -> GrabInput {
        GrabInput {
            resource_id: "r1".to_string(),
            thumbnail_id: "card".to_string(),
            source_type: "article".to_string(),
            source_id: "a1".to_string(),
            x,
            y,
            zoom: Some(1.0),
        }
    }

    async fn setup() -> (
        FocalThumbnailPipeline,
        Arc<InMemoryRepository>,
        crate::jobs::JobReceiver,
    ) {
        let (queue, receiver) = InProcessJobQueue::new();
        let (pipeline, repository) = setup_with(Arc::new(queue)).await;
        (pipeline, repository, receiver)
    }

    async fn setup_with(
        queue: Arc<dyn JobQueue>,
    ) -> (FocalThumbnailPipeline, Arc<InMemoryRepository>) {
        let repository = Arc::new(InMemoryRepository::new());
        repository
            .create(NewResource {
                id: "r1".to_string(),
                disk: "local".to_string(),
                path: "uploads/2024-01-15/r1.jpg".to_string(),
                extension: ".jpg".to_string(),
                original_name: "photo.jpg".to_string(),
                safe_name: "r1.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                size: 10,
                uploaded_by: None,
                owner_id: None,
                preserve: false,
                original_at: None,
            })
            .await
            .unwrap();
        repository
            .upsert_thumbnail(ThumbnailDefinition {
                id: "card".to_string(),
                width: 64,
                height: 48,
                fit: true,
                grab_enabled: true,
                description: None,
            })
            .await
            .unwrap();

        let pipeline = FocalThumbnailPipeline::new(
            repository.clone(),
            repository.clone(),
            repository.clone(),
            Disks::new(),
            queue,
            90,
        );

        (pipeline, repository)
    }

    #[tokio::test]
    async fn test_repeated_tuple_enqueues_once() {
        let (pipeline, repository, mut receiver) = setup().await;

        let first = pipeline.generate_thumbs(&[grab(10.0, 20.0)]).await.unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(receiver.drain().len(), 1);

        let second = pipeline.generate_thumbs(&[grab(10.0, 20.0)]).await.unwrap();
        assert_eq!(second.unchanged, 1);
        assert!(receiver.drain().is_empty());

        let third = pipeline.generate_thumbs(&[grab(30.0, 20.0)]).await.unwrap();
        assert_eq!(third.updated, 1);

        let jobs = receiver.drain();
        assert_eq!(jobs.len(), 1);
        match &jobs[0] {
            Job::GrabThumbnail { grab, thumbnail, .. } => {
                assert_eq!(grab.x, 30.0);
                assert_eq!(thumbnail.width, 64);
            }
            other => panic!("unexpected job {other:?}"),
        }

        let stored = repository
            .find_grab(&GrabKey {
                resource_id: "r1".to_string(),
                thumbnail_id: "card".to_string(),
                source_type: "article".to_string(),
                source_id: "a1".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.x, 30.0);
    }

    #[tokio::test]
    async fn test_zoom_change_alone_is_unchanged() {
        let (pipeline, _repository, mut receiver) = setup().await;
        pipeline.generate_thumbs(&[grab(1.0, 2.0)]).await.unwrap();
        receiver.drain();

        let mut zoomed = grab(1.0, 2.0);
        zoomed.zoom = Some(3.0);
        let report = pipeline.generate_thumbs(&[zoomed]).await.unwrap();

        assert_eq!(report.unchanged, 1);
        assert!(receiver.drain().is_empty());
    }

    #[tokio::test]
    async fn test_missing_entities_are_skipped_without_aborting() {
        let (pipeline, repository, mut receiver) = setup().await;

        let mut unknown_resource = grab(1.0, 1.0);
        unknown_resource.resource_id = "missing".to_string();
        let mut unknown_thumbnail = grab(1.0, 1.0);
        unknown_thumbnail.thumbnail_id = "missing".to_string();

        let report = pipeline
            .generate_thumbs(&[unknown_resource, grab(5.0, 5.0), unknown_thumbnail])
            .await
            .unwrap();

        assert_eq!(
            report,
            GrabBatchReport {
                created: 1,
                updated: 0,
                unchanged: 0,
                skipped: 2
            }
        );
        assert_eq!(receiver.drain().len(), 1);
        assert!(repository
            .find_grab(&GrabKey {
                resource_id: "missing".to_string(),
                thumbnail_id: "card".to_string(),
                source_type: "article".to_string(),
                source_id: "a1".to_string(),
            })
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_enqueue_is_retried_on_replay() {
        let (inner, mut receiver) = InProcessJobQueue::new();
        let queue = Arc::new(FailsFirstEnqueue {
            inner,
            failed: AtomicBool::new(false),
        });
        let (pipeline, repository) = setup_with(queue).await;

        let first = pipeline.generate_thumbs(&[grab(4.0, 4.0)]).await.unwrap();
        assert_eq!(first.skipped, 1);
        assert!(receiver.drain().is_empty());
        let key = grab(4.0, 4.0).key();
        assert!(repository.find_grab(&key).await.unwrap().is_none());

        let replay = pipeline.generate_thumbs(&[grab(4.0, 4.0)]).await.unwrap();
        assert_eq!(replay.created, 1);
        assert_eq!(receiver.drain().len(), 1);
        assert!(repository.find_grab(&key).await.unwrap().is_some());
    }

    #[test]
    fn test_unique_keeps_first_occurrence_order() {
        let ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(unique(ids.iter()), vec!["b".to_string(), "a".to_string()]);
    }
}
