mod common;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::{png, Harness};
use resource_service::config::ResourcesConfig;
use resource_service::{DownloadRequest, ObjectStorage, ResourceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
struct Origin {
    flaky_hits: Arc<AtomicUsize>,
}

async fn photo() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], png(12, 8).to_vec())
}

async fn attachment() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"Q3 Report.pdf\""),
        ],
        b"%PDF-1.4 report".to_vec(),
    )
}

/// Fails twice before serving
async fn flaky(State(origin): State<Origin>) -> impl IntoResponse {
    if origin.flaky_hits.fetch_add(1, Ordering::SeqCst) < 2 {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], png(4, 4).to_vec()).into_response()
}

async fn missing(State(origin): State<Origin>) -> StatusCode {
    origin.flaky_hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND
}

async fn spawn_origin() -> (String, Origin) {
    let origin = Origin::default();
    let router = Router::new()
        .route("/", get(photo))
        .route("/media/Holiday_Photo.png", get(photo))
        .route("/export.php", get(attachment))
        .route("/flaky/retry.png", get(flaky))
        .route("/missing.png", get(missing))
        .with_state(origin.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), origin)
}

#[tokio::test]
async fn test_download_names_file_from_url() {
    let (base, _) = spawn_origin().await;
    let harness = Harness::new();
    let ingestion = harness.ingestion(ResourcesConfig::default());

    let outcome = ingestion
        .download(DownloadRequest::new(format!("{base}/media/Holiday_Photo.png?size=large")))
        .await
        .unwrap()
        .unwrap();

    let resource = outcome.into_resource();
    assert_eq!(resource.original_name, "holiday-photo.png");
    assert_eq!(resource.mime_type, "image/png");
    assert!(harness.local.exists(&resource.path).await.unwrap());

    // same bytes again are recognised
    let again = ingestion
        .download(DownloadRequest::new(format!("{base}/media/Holiday_Photo.png")))
        .await
        .unwrap()
        .unwrap();
    assert!(again.is_duplicate());
}

#[tokio::test]
async fn test_download_prefers_content_disposition() {
    let (base, _) = spawn_origin().await;
    let harness = Harness::new();
    let ingestion = harness.ingestion(ResourcesConfig::default());

    let resource = ingestion
        .download(DownloadRequest::new(format!("{base}/export.php?id=7")))
        .await
        .unwrap()
        .unwrap()
        .into_resource();

    assert_eq!(resource.original_name, "q3-report.pdf");
    assert_eq!(resource.mime_type, "application/pdf");
    assert_eq!(resource.extension, ".pdf");
}

#[tokio::test]
async fn test_download_retries_server_errors() {
    let (base, origin) = spawn_origin().await;
    let harness = Harness::new();
    let ingestion = harness.ingestion(ResourcesConfig::default());

    let outcome = ingestion
        .download(DownloadRequest::new(format!("{base}/flaky/retry.png")))
        .await
        .unwrap();

    assert!(outcome.is_some());
    assert_eq!(origin.flaky_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_download_client_error_is_not_retried() {
    let (base, origin) = spawn_origin().await;
    let harness = Harness::new();
    let ingestion = harness.ingestion(ResourcesConfig::default());

    let err = ingestion
        .download(DownloadRequest::new(format!("{base}/missing.png")))
        .await
        .unwrap_err();

    match err {
        ResourceError::TransientFetch { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(origin.flaky_hits.load(Ordering::SeqCst), 1);
    assert_eq!(harness.repository.resource_count(), 0);
}

#[tokio::test]
async fn test_download_without_file_name_is_skipped() {
    let (base, _) = spawn_origin().await;
    let harness = Harness::new();
    let ingestion = harness.ingestion(ResourcesConfig::default());

    let outcome = ingestion
        .download(DownloadRequest::new(format!("{base}/")))
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(harness.repository.resource_count(), 0);
}

#[tokio::test]
async fn test_download_with_known_custom_id_returns_existing() {
    let (base, _) = spawn_origin().await;
    let harness = Harness::new();
    let ingestion = harness.ingestion(ResourcesConfig::default());

    let mut request = DownloadRequest::new(format!("{base}/media/Holiday_Photo.png"));
    request.custom_id = Some("photo-1".to_string());
    let first = ingestion.download(request.clone()).await.unwrap().unwrap();
    assert!(!first.is_duplicate());
    assert_eq!(first.resource().id, "photo-1");

    let second = ingestion.download(request).await.unwrap().unwrap();
    assert!(second.is_duplicate());
    assert_eq!(second.resource().id, "photo-1");
}
