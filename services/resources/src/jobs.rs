//! Background jobs: preview thumbnails deferred from upload and focal
//! thumbnails scheduled by the grab pipeline.
//!
//! Delivery is at-least-once. A failed job goes back on the queue until it has
//! been attempted `max_attempts` times, after which the handler's `on_error`
//! hook sees it. Jobs carry everything they need, so handlers may run them in
//! any order and in parallel.

use crate::config::PreviewDefinition;
use crate::error::{ResourceError, Result};
use crate::grab::FocalThumbnailPipeline;
use crate::ingestion::IngestionService;
use crate::model::{GrabInput, Resource, ThumbnailDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Unit of background work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    /// Preview thumbnails that were not generated during upload
    PreviewThumbnails {
        resource_id: String,
        disk: String,
        path: String,
        definitions: Vec<PreviewDefinition>,
    },
    /// Focal-point thumbnail for one grab binding
    GrabThumbnail {
        grab: GrabInput,
        resource: Resource,
        thumbnail: ThumbnailDefinition,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreviewThumbnails { .. } => "preview_thumbnails",
            Self::GrabThumbnail { .. } => "grab_thumbnail",
        }
    }
}

/// A job plus its delivery bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    /// Delivery attempt, starting at 1
    pub attempt: u32,
    pub job: Job,
}

/// Fire-and-forget job submission
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
}

/// Queue backed by an in-process channel
#[derive(Clone)]
pub struct InProcessJobQueue {
    sender: mpsc::UnboundedSender<Envelope>,
}

/// Consuming end of an [`InProcessJobQueue`]
pub struct JobReceiver {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl InProcessJobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, JobReceiver { receiver })
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        self.sender
            .send(envelope)
            .map_err(|_| ResourceError::Queue("Job queue is closed".to_string()))
    }
}

#[async_trait]
impl JobQueue for InProcessJobQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        let envelope = Envelope {
            id: Uuid::new_v4(),
            attempt: 1,
            job,
        };

        debug!(job_id = %envelope.id, kind = envelope.job.kind(), "Job enqueued");
        metrics::counter!("resources.jobs.enqueued").increment(1);
        self.send(envelope)
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Next pending job without waiting
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    /// All pending jobs without waiting
    pub fn drain(&mut self) -> Vec<Job> {
        std::iter::from_fn(|| self.try_recv())
            .map(|envelope| envelope.job)
            .collect()
    }
}

/// Handler trait for processing jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process a single job
    async fn handle(&self, job: &Job) -> Result<()>;

    /// Called when a job has failed its last attempt
    async fn on_error(&self, envelope: &Envelope, error: ResourceError) {
        error!(
            job_id = %envelope.id,
            kind = envelope.job.kind(),
            attempts = envelope.attempt,
            error = %error,
            "Job failed permanently"
        );
    }
}

/// Dispatches jobs to the ingestion and focal thumbnail services
pub struct ResourceJobHandler {
    ingestion: Arc<IngestionService>,
    pipeline: Arc<FocalThumbnailPipeline>,
}

impl ResourceJobHandler {
    pub fn new(ingestion: Arc<IngestionService>, pipeline: Arc<FocalThumbnailPipeline>) -> Self {
        Self {
            ingestion,
            pipeline,
        }
    }
}

#[async_trait]
impl JobHandler for ResourceJobHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        match job {
            Job::PreviewThumbnails {
                resource_id,
                disk,
                path,
                definitions,
            } => {
                self.ingestion
                    .generate_preview_thumbnails(resource_id, disk, path, definitions)
                    .await
            }
            Job::GrabThumbnail {
                grab,
                resource,
                thumbnail,
            } => self
                .pipeline
                .render_thumbnail(grab, resource, thumbnail)
                .await
                .map(|_| ()),
        }
    }
}

/// Pool consuming an [`InProcessJobQueue`]
pub struct JobWorker {
    handler: Arc<dyn JobHandler>,
    queue: InProcessJobQueue,
    receiver: JobReceiver,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    max_attempts: u32,
    shutdown: CancellationToken,
}

impl JobWorker {
    pub fn new(
        handler: Arc<dyn JobHandler>,
        queue: InProcessJobQueue,
        receiver: JobReceiver,
        concurrency: usize,
        max_attempts: u32,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            handler,
            queue,
            receiver,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            max_attempts: max_attempts.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the worker when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Consume jobs until shutdown, then wait for in-flight jobs
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        info!(
            concurrency = self.concurrency,
            max_attempts = self.max_attempts,
            "Starting job worker"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Received shutdown signal");
                    break;
                }
                envelope = self.receiver.recv() => {
                    let Some(envelope) = envelope else {
                        debug!("Job queue closed");
                        break;
                    };

                    let permit = self
                        .semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| ResourceError::Queue(e.to_string()))?;

                    let handler = self.handler.clone();
                    let queue = self.queue.clone();
                    let max_attempts = self.max_attempts;

                    tokio::spawn(async move {
                        process(handler, queue, envelope, max_attempts).await;
                        drop(permit);
                    });
                }
            }
        }

        // Wait for in-flight jobs
        let _ = self
            .semaphore
            .acquire_many(self.concurrency as u32)
            .await;

        info!("Job worker stopped");
        Ok(())
    }
}

async fn process(
    handler: Arc<dyn JobHandler>,
    queue: InProcessJobQueue,
    envelope: Envelope,
    max_attempts: u32,
) {
    match handler.handle(&envelope.job).await {
        Ok(()) => {
            debug!(job_id = %envelope.id, kind = envelope.job.kind(), "Job processed");
            metrics::counter!("resources.jobs.processed").increment(1);
        }
        Err(e) if envelope.attempt < max_attempts => {
            warn!(
                job_id = %envelope.id,
                kind = envelope.job.kind(),
                attempt = envelope.attempt,
                error = %e,
                "Job failed, requeueing"
            );
            metrics::counter!("resources.jobs.retried").increment(1);

            let retry = Envelope {
                attempt: envelope.attempt + 1,
                ..envelope.clone()
            };
            if let Err(send_err) = queue.send(retry) {
                handler.on_error(&envelope, send_err).await;
            }
        }
        Err(e) => {
            metrics::counter!("resources.jobs.failed").increment(1);
            handler.on_error(&envelope, e).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FlakyHandler {
        failures_left: AtomicU32,
        calls: AtomicU32,
        gave_up: Mutex<Vec<u32>>,
    }

    impl FlakyHandler {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                gave_up: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &Job) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ResourceError::Storage("flaky".to_string()));
            }
            Ok(())
        }

        async fn on_error(&self, envelope: &Envelope, _error: ResourceError) {
            self.gave_up.lock().unwrap().push(envelope.attempt);
        }
    }

    fn preview_job() -> Job {
        Job::PreviewThumbnails {
            resource_id: "r1".to_string(),
            disk: "local".to_string(),
            path: "uploads/2024-01-15/r1.jpg".to_string(),
            definitions: vec![],
        }
    }

    async fn run_until_idle(handler: Arc<FlakyHandler>, max_attempts: u32) {
        let (queue, receiver) = InProcessJobQueue::new();
        queue.enqueue(preview_job()).await.unwrap();

        let worker = JobWorker::new(handler, queue, receiver, 2, max_attempts);
        let shutdown = worker.shutdown_token();
        let task = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_job_serialization_is_tagged() {
        let json = serde_json::to_value(preview_job()).unwrap();
        assert_eq!(json["type"], "preview_thumbnails");
        assert_eq!(json["resource_id"], "r1");
    }

    #[tokio::test]
    async fn test_drain_returns_pending_jobs() {
        let (queue, mut receiver) = InProcessJobQueue::new();
        queue.enqueue(preview_job()).await.unwrap();
        queue.enqueue(preview_job()).await.unwrap();

        assert_eq!(receiver.drain().len(), 2);
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_on_closed_queue_fails() {
        let (queue, receiver) = InProcessJobQueue::new();
        drop(receiver);
        let err = queue.enqueue(preview_job()).await.unwrap_err();
        assert_eq!(err.code(), "QUEUE_ERROR");
    }

    #[tokio::test]
    async fn test_worker_retries_until_success() {
        let handler = Arc::new(FlakyHandler::new(2));
        run_until_idle(handler.clone(), 3).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(handler.gave_up.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_gives_up_after_max_attempts() {
        let handler = Arc::new(FlakyHandler::new(10));
        run_until_idle(handler.clone(), 3).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*handler.gave_up.lock().unwrap(), vec![3]);
    }
}
