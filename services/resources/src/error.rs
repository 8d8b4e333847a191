//! Error taxonomy shared by the resource services.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, ResourceError>;

/// Errors produced by ingestion, derivative generation and the thumbnail pipeline
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Derivative generation failed: {0}")]
    DerivativeGeneration(String),

    #[error("Transient fetch failure for {source_url} after {attempts} attempts: {message}")]
    TransientFetch {
        source_url: String,
        attempts: u32,
        message: String,
    },

    #[error("Failed to write {path} on disk {disk}: {message}")]
    StorageWrite {
        disk: String,
        path: String,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ResourceError {
    pub fn resource_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Resource",
            id: id.into(),
        }
    }

    pub fn thumbnail_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Thumbnail",
            id: id.into(),
        }
    }

    /// Machine readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::DerivativeGeneration(_) => "DERIVATIVE_GENERATION_FAILED",
            Self::TransientFetch { .. } => "FETCH_FAILED",
            Self::StorageWrite { .. } => "STORAGE_WRITE_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for ResourceError {
    fn from(e: sqlx::Error) -> Self {
        Self::Repository(e.to_string())
    }
}

impl From<image::ImageError> for ResourceError {
    fn from(e: image::ImageError) -> Self {
        Self::DerivativeGeneration(e.to_string())
    }
}
