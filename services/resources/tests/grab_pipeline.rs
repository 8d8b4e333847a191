mod common;

use common::{decoded_dimensions, png, Harness};
use resource_service::config::{DownloadConfig, ResourcesConfig};
use resource_service::{
    FocalThumbnailPipeline, GrabInput, InProcessJobQueue, IngestionService, JobQueue, JobWorker,
    ObjectStorage, ResourceError, ResourceJobHandler, ThumbnailDefinition, ThumbnailRepository,
    UploadRequest,
};
use std::sync::Arc;
use std::time::Duration;

fn card(width: i32, height: i32) -> ThumbnailDefinition {
    ThumbnailDefinition {
        id: "card".to_string(),
        width,
        height,
        fit: true,
        grab_enabled: true,
        description: None,
    }
}

fn grab(x: f64, y: f64) -> GrabInput {
    GrabInput {
        resource_id: "img-1".to_string(),
        thumbnail_id: "card".to_string(),
        source_type: "article".to_string(),
        source_id: "42".to_string(),
        x,
        y,
        zoom: None,
    }
}

#[tokio::test]
async fn test_scheduled_thumbnail_is_rendered_by_worker() {
    let harness = Harness::new();
    let (queue, receiver) = InProcessJobQueue::new();
    let job_queue: Arc<dyn JobQueue> = Arc::new(queue.clone());

    let ingestion = Arc::new(
        IngestionService::new(
            harness.repository.clone(),
            harness.disks(),
            job_queue.clone(),
            ResourcesConfig::default(),
            DownloadConfig::default(),
        )
        .unwrap(),
    );
    ingestion
        .upload(UploadRequest::new(png(200, 100), "wide.png", "image/png").with_custom_id("img-1"))
        .await
        .unwrap();
    harness.repository.upsert_thumbnail(card(60, 40)).await.unwrap();

    let pipeline = Arc::new(FocalThumbnailPipeline::new(
        harness.repository.clone(),
        harness.repository.clone(),
        harness.repository.clone(),
        harness.disks(),
        job_queue,
        85,
    ));

    let report = pipeline.generate_thumbs(&[grab(120.0, 40.0)]).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.scheduled(), 1);

    let handler = Arc::new(ResourceJobHandler::new(ingestion, pipeline.clone()));
    let worker = JobWorker::new(handler, queue, receiver, 2, 3);
    let shutdown = worker.shutdown_token();
    let handle = tokio::spawn(worker.run());

    let thumbnail_path = "thumbnails/card/img/1.jpg";
    let rendered = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if harness.local.exists(thumbnail_path).await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(rendered.is_ok(), "thumbnail was not rendered in time");

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let body = harness.local.read(thumbnail_path).await.unwrap();
    assert_eq!(decoded_dimensions(&body), (60, 40));

    // replaying the same batch schedules nothing
    let report = pipeline.generate_thumbs(&[grab(120.0, 40.0)]).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.scheduled(), 0);
}

#[tokio::test]
async fn test_render_rejects_zero_sized_definition() {
    let harness = Harness::new();
    let ingestion = harness.ingestion(ResourcesConfig::default());
    let resource = ingestion
        .upload(UploadRequest::new(png(20, 20), "a.png", "image/png").with_custom_id("img-1"))
        .await
        .unwrap()
        .into_resource();

    let pipeline = FocalThumbnailPipeline::new(
        harness.repository.clone(),
        harness.repository.clone(),
        harness.repository.clone(),
        harness.disks(),
        harness.queue.clone(),
        85,
    );

    let err = pipeline
        .render_thumbnail(&grab(1.0, 1.0), &resource, &card(0, 40))
        .await
        .unwrap_err();
    assert!(matches!(err, ResourceError::InvalidInput(_)));

    let path = pipeline
        .render_thumbnail(&grab(1.0, 1.0), &resource, &card(10, 10))
        .await
        .unwrap();
    assert_eq!(path, "thumbnails/card/img/1.jpg");
}
