//! Resource Service
//!
//! Media resource store for uploaded and downloaded files. Originals land on a
//! named storage disk with a metadata record; identical content is detected by
//! checksum and stored once. Resized images, video preview frames, rotated
//! transcodes and focal-point thumbnails are produced on demand and cached
//! next to the original.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API (axum)
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ /resources/...          /admin/resources    /admin/grab  │
//!   └──────────────────────────────────────────────────────────┘
//!        │                         │                    │
//!        ▼                         ▼                    ▼
//! ┌──────────────┐         ┌──────────────┐     ┌──────────────┐
//! │ Derivative   │         │ Ingestion    │     │ Focal        │
//! │ Service      │         │ Service      │     │ Thumbnails   │
//! └──────────────┘         └──────────────┘     └──────────────┘
//!    │        │               │       │             │      │
//!    │        ▼               ▼       │             ▼      │
//!    │  ┌──────────┐   ┌──────────┐   │      ┌──────────┐  │
//!    │  │ Video    │   │ Checksum │   └─────▶│ Job      │◀─┘
//!    │  │ Sampler  │   │ Index    │          │ Queue    │
//!    │  └──────────┘   └──────────┘          └──────────┘
//!    ▼                                             │
//! ┌──────────────┐         ┌──────────────┐        ▼
//! │ Disks        │         │ Repository   │  ┌──────────────┐
//! │ local / S3   │         │ PG / memory  │  │ Job Worker   │
//! └──────────────┘         └──────────────┘  └──────────────┘
//! ```

pub mod api;
pub mod cache_path;
pub mod checksum;
pub mod config;
pub mod derivatives;
pub mod error;
pub mod grab;
pub mod image_ops;
pub mod ingestion;
pub mod jobs;
pub mod model;
pub mod repository;
pub mod storage;
pub mod video;

pub use api::{create_router, start_api_server, AppState};
pub use cache_path::CachePathResolver;
pub use checksum::ChecksumIndex;
pub use config::Config;
pub use derivatives::{DerivativeService, PlaceholderKind, ServedArtifact};
pub use error::{ResourceError, Result};
pub use grab::{FocalThumbnailPipeline, GrabBatchReport, GrabOutcome};
pub use image_ops::{CropBox, ImageDerivativeGenerator};
pub use ingestion::{DownloadRequest, IngestOutcome, IngestionService, UploadRequest};
pub use jobs::{InProcessJobQueue, Job, JobQueue, JobWorker, ResourceJobHandler};
pub use model::{GrabInput, GrabProperty, Resource, ResourceFilter, ThumbnailDefinition};
pub use repository::{
    GrabPropertyRepository, InMemoryRepository, PgRepository, ResourceRepository,
    ThumbnailRepository,
};
pub use storage::{Disks, LocalDisk, ObjectStorage, S3Disk};
pub use video::{FfmpegCli, FrameGrabber, Rotation, VideoFrameSampler};
