use crate::config::ApiConfig;
use crate::derivatives::{DerivativeService, ServedArtifact};
use crate::error::ResourceError;
use crate::grab::{FocalThumbnailPipeline, GrabBatchReport};
use crate::ingestion::{DownloadRequest, IngestOutcome, IngestionService, UploadRequest};
use crate::model::{GrabInput, Resource, ResourceFilter};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<IngestionService>,
    pub derivatives: Arc<DerivativeService>,
    pub pipeline: Arc<FocalThumbnailPipeline>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a service error onto a status code and JSON body
pub fn error_response(e: ResourceError) -> ApiError {
    let status = match e {
        ResourceError::NotFound { .. } => StatusCode::NOT_FOUND,
        ResourceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %e, "Request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: e.code().to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(ResourceError::InvalidInput(message.into()))
}

/// Ingestion result in API responses
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub duplicate: bool,
    pub resource: Resource,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            duplicate: outcome.is_duplicate(),
            resource: outcome.into_resource(),
        }
    }
}

/// Ids for the bulk lifecycle operations
#[derive(Debug, Deserialize)]
pub struct IdList {
    pub list: Vec<String>,
}

/// Resources touched by a bulk operation
#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub affected: Vec<String>,
}

impl From<Vec<Resource>> for AffectedResponse {
    fn from(resources: Vec<Resource>) -> Self {
        Self {
            affected: resources.into_iter().map(|r| r.id).collect(),
        }
    }
}

/// Query parameters for the resource list
#[derive(Debug, Deserialize)]
pub struct ResourceListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    pub owner_id: Option<String>,
    pub disk: Option<String>,
    pub mime_type: Option<String>,
    pub q: Option<String>,
    #[serde(default)]
    pub with_trashed: bool,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    50
}

/// Resource list response
#[derive(Debug, Serialize)]
pub struct ResourceListResponse {
    pub resources: Vec<Resource>,
    pub page: u32,
    pub per_page: u32,
    pub total_count: i64,
    pub has_more: bool,
}

/// Focal-point batch
#[derive(Debug, Deserialize)]
pub struct GrabBatchRequest {
    pub images: Vec<GrabInput>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/resources/:id", get(show_original))
        .route("/resources/:id/:width/:height", get(show_resized))
        .route("/resources/:id/:width/:height/:fit", get(show_resized_fit))
        .route("/videos/:id/rotate/:angle", get(show_rotated))
        .route(
            "/admin/resources",
            get(list_resources)
                .post(upload_resource)
                .delete(delete_resources)
                .patch(restore_resources),
        )
        .route("/admin/resources/download", post(download_resource))
        .route("/admin/resources/force", delete(force_delete_resources))
        .route("/admin/grab-properties", post(generate_grab_thumbnails))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "resource-service"
    }))
}

/// Response carrying a served file
fn artifact_response(artifact: ServedArtifact) -> Response {
    let disposition = format!("inline; filename=\"{}\"", artifact.file_name);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.content_type),
            (header::CONTENT_LENGTH, artifact.content_length.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(artifact.body),
    )
        .into_response()
}

/// `1`, `true` and `fit` request cover mode
fn parse_fit(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "fit" | "yes")
}

#[instrument(skip(state))]
async fn show_original(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state
        .derivatives
        .show(&id, 0, 0, false)
        .await
        .map_err(error_response)?;
    Ok(artifact_response(artifact))
}

#[instrument(skip(state))]
async fn show_resized(
    State(state): State<AppState>,
    Path((id, width, height)): Path<(String, u32, u32)>,
) -> Result<Response, ApiError> {
    let artifact = state
        .derivatives
        .show(&id, width, height, false)
        .await
        .map_err(error_response)?;
    Ok(artifact_response(artifact))
}

#[instrument(skip(state))]
async fn show_resized_fit(
    State(state): State<AppState>,
    Path((id, width, height, fit)): Path<(String, u32, u32, String)>,
) -> Result<Response, ApiError> {
    let artifact = state
        .derivatives
        .show(&id, width, height, parse_fit(&fit))
        .await
        .map_err(error_response)?;
    Ok(artifact_response(artifact))
}

#[instrument(skip(state))]
async fn show_rotated(
    State(state): State<AppState>,
    Path((id, angle)): Path<(String, u16)>,
) -> Result<Response, ApiError> {
    let artifact = state
        .derivatives
        .show_rotated_video(&id, angle)
        .await
        .map_err(error_response)?;
    Ok(artifact_response(artifact))
}

/// List resources with filtering
#[instrument(skip(state))]
async fn list_resources(
    State(state): State<AppState>,
    Query(params): Query<ResourceListQuery>,
) -> Result<Json<ResourceListResponse>, ApiError> {
    let filter = ResourceFilter {
        owner_id: params.owner_id,
        disk: params.disk,
        mime_type: params.mime_type,
        search: params.q,
        with_trashed: params.with_trashed,
        ..Default::default()
    };

    let page = state
        .ingestion
        .list(&filter, params.page, params.per_page.clamp(1, 500))
        .await
        .map_err(error_response)?;

    Ok(Json(ResourceListResponse {
        has_more: page.has_more(),
        page: page.page,
        per_page: page.per_page,
        total_count: page.total,
        resources: page.items,
    }))
}

/// Multipart upload: a `file` part plus optional form fields
#[instrument(skip(state, multipart))]
async fn upload_resource(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let mut file: Option<(Bytes, String, String)> = None;
    let mut fields: Vec<(String, String)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("Failed to read file part: {e}")))?;
            file = Some((data, file_name, content_type));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| bad_request(format!("Failed to read field {name}: {e}")))?;
            fields.push((name, value));
        }
    }

    let (data, file_name, content_type) = file.ok_or_else(|| bad_request("Missing file part"))?;
    let request = apply_upload_fields(UploadRequest::new(data, file_name, content_type), fields)?;

    let outcome = state
        .ingestion
        .upload(request)
        .await
        .map_err(error_response)?;

    let status = if outcome.is_duplicate() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((status, Json(outcome.into())))
}

fn apply_upload_fields(
    mut request: UploadRequest,
    fields: Vec<(String, String)>,
) -> Result<UploadRequest, ApiError> {
    for (name, value) in fields {
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }

        match name.as_str() {
            "owner_id" => request.owner_id = Some(value),
            "uploaded_by" => request.uploaded_by = Some(value),
            "disk" => request.disk = Some(value),
            "custom_id" | "id" => request.custom_id = Some(value),
            "preserve" => request.preserve = parse_fit(&value),
            "allow_duplicates" => request.allow_duplicates = Some(parse_fit(&value)),
            "preview_sizes" => request
                .preview_sizes
                .extend(value.split(',').map(|s| s.trim().to_string())),
            "last_modified" => {
                request.original_at = Some(parse_timestamp(&value).ok_or_else(|| {
                    bad_request(format!("Invalid last_modified: {value}"))
                })?)
            }
            "upload_date" => {
                request.upload_date = Some(
                    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                        .map_err(|_| bad_request(format!("Invalid upload_date: {value}")))?,
                )
            }
            other => warn!(field = %other, "Ignoring unknown upload field"),
        }
    }

    Ok(request)
}

/// RFC 3339 or milliseconds since the epoch
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(millis) = value.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[instrument(skip(state, request), fields(url = %request.url))]
async fn download_resource(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<Response, ApiError> {
    let outcome = state
        .ingestion
        .download(request)
        .await
        .map_err(error_response)?;

    Ok(match outcome {
        Some(outcome) => Json(IngestResponse::from(outcome)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[instrument(skip(state))]
async fn delete_resources(
    State(state): State<AppState>,
    Json(ids): Json<IdList>,
) -> Result<Json<AffectedResponse>, ApiError> {
    let deleted = state
        .ingestion
        .delete_soft(&ids.list)
        .await
        .map_err(error_response)?;
    Ok(Json(deleted.into()))
}

#[instrument(skip(state))]
async fn restore_resources(
    State(state): State<AppState>,
    Json(ids): Json<IdList>,
) -> Result<Json<AffectedResponse>, ApiError> {
    let restored = state
        .ingestion
        .restore(&ids.list)
        .await
        .map_err(error_response)?;
    Ok(Json(restored.into()))
}

#[instrument(skip(state))]
async fn force_delete_resources(
    State(state): State<AppState>,
    Json(ids): Json<IdList>,
) -> Result<Json<AffectedResponse>, ApiError> {
    let deleted = state
        .ingestion
        .force_delete(&ids.list)
        .await
        .map_err(error_response)?;
    Ok(Json(deleted.into()))
}

#[instrument(skip(state, request), fields(batch_size = request.images.len()))]
async fn generate_grab_thumbnails(
    State(state): State<AppState>,
    Json(request): Json<GrabBatchRequest>,
) -> Result<Json<GrabBatchReport>, ApiError> {
    let report = state
        .pipeline
        .generate_thumbs(&request.images)
        .await
        .map_err(error_response)?;
    Ok(Json(report))
}

/// Start the API server, returning once `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting resource API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
