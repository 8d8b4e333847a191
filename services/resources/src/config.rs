use crate::model::ThumbnailDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the resource service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration; the in-memory repository is used when absent
    pub database: Option<DatabaseConfig>,
    /// Named storage disks
    #[serde(default = "default_disks")]
    pub disks: HashMap<String, DiskConfig>,
    /// Ingestion and derivative settings
    #[serde(default)]
    pub resources: ResourcesConfig,
    /// Video codec settings
    #[serde(default)]
    pub video: VideoConfig,
    /// Remote download settings
    #[serde(default)]
    pub download: DownloadConfig,
    /// Focal thumbnail settings
    #[serde(default)]
    pub thumbnails: ThumbnailsConfig,
    /// Background job worker settings
    #[serde(default)]
    pub worker: WorkerConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Storage disk definition
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DiskConfig {
    /// Directory on the local filesystem
    Local {
        root: PathBuf,
        /// Base URL the root is published under
        #[serde(default)]
        url: Option<String>,
    },
    /// S3 compatible bucket
    S3(S3DiskConfig),
}

/// S3 disk configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3DiskConfig {
    /// Bucket name
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Public base URL objects are reachable under
    pub public_url: Option<String>,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Ingestion and derivative configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesConfig {
    /// Files larger than this are never hashed nor deduplicated
    #[serde(default = "default_max_checksum_size")]
    pub max_checksum_size: u64,
    /// Default disk for uploads
    #[serde(default = "default_upload_disk")]
    pub upload_disk: String,
    /// Disk receiving preview thumbnails
    #[serde(default = "default_preview_disk")]
    pub preview_disk: String,
    /// Whether identical content may be stored twice
    #[serde(default)]
    pub allow_duplicates: bool,
    /// Shrink originals to `original_dimensions` on upload
    #[serde(default)]
    pub resize_original: bool,
    #[serde(default)]
    pub original_dimensions: OriginalDimensions,
    /// Preview thumbnails produced on upload
    #[serde(default)]
    pub image_preview: Vec<PreviewDefinition>,
    /// Placeholders served when an original is missing
    #[serde(default)]
    pub file_not_found: Placeholders,
    /// JPEG quality for cached resizes
    #[serde(default = "default_quality")]
    pub cache_quality: u8,
    /// Largest width or height a resize may be requested at
    #[serde(default = "default_max_derivative_dimension")]
    pub max_derivative_dimension: u32,
}

/// Bounding box for originals resized on upload
#[derive(Debug, Clone, Deserialize)]
pub struct OriginalDimensions {
    #[serde(default = "default_original_width")]
    pub width: u32,
    #[serde(default = "default_original_height")]
    pub height: u32,
    #[serde(default = "default_original_quality")]
    pub quality: u8,
}

/// Preview thumbnail produced for uploaded images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewDefinition {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Generate synchronously during upload instead of through the queue
    #[serde(default)]
    pub generate: bool,
    /// Always produced, regardless of the requested sizes
    #[serde(default)]
    pub default: bool,
}

impl PreviewDefinition {
    /// Size label in `{width}x{height}` form
    pub fn size_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Placeholder bodies per media class
#[derive(Debug, Clone, Deserialize)]
pub struct Placeholders {
    #[serde(default = "default_image_placeholder")]
    pub image: String,
    #[serde(default = "default_video_placeholder")]
    pub video: String,
    #[serde(default = "default_file_placeholder")]
    pub file: String,
}

/// Video codec configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Threads handed to ffmpeg
    #[serde(default = "default_ffmpeg_threads")]
    pub threads: u32,
    /// Upper bound for a single codec invocation
    #[serde(default = "default_codec_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum number of sampled frames
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    /// Maximum number of sampled frames
    #[serde(default = "default_max_samples")]
    pub max_samples: u32,
}

/// Remote download configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Retries of the header request after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between header request attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Scratch directory for downloaded files
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

/// Focal thumbnail configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailsConfig {
    /// JPEG quality of focal thumbnails
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Definitions inserted into the repository at startup
    #[serde(default)]
    pub seed: Vec<ThumbnailDefinition>,
}

/// Background worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Jobs processed concurrently
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    /// Delivery attempts per job before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "resource-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_disks() -> HashMap<String, DiskConfig> {
    let mut disks = HashMap::new();
    disks.insert(
        "local".to_string(),
        DiskConfig::Local {
            root: PathBuf::from("storage/app"),
            url: None,
        },
    );
    disks.insert(
        "public".to_string(),
        DiskConfig::Local {
            root: PathBuf::from("storage/app/public"),
            url: None,
        },
    );
    disks
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_checksum_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

fn default_upload_disk() -> String {
    "local".to_string()
}

fn default_preview_disk() -> String {
    "public".to_string()
}

fn default_quality() -> u8 {
    90
}

/// Resize requests above this edge length are rejected
pub const DEFAULT_MAX_DERIVATIVE_DIMENSION: u32 = 4096;

fn default_max_derivative_dimension() -> u32 {
    DEFAULT_MAX_DERIVATIVE_DIMENSION
}

fn default_original_width() -> u32 {
    1920
}

fn default_original_height() -> u32 {
    1080
}

fn default_original_quality() -> u8 {
    100
}

fn default_image_placeholder() -> String {
    placeholder_svg("image")
}

fn default_video_placeholder() -> String {
    placeholder_svg("video")
}

fn default_file_placeholder() -> String {
    placeholder_svg("file")
}

fn placeholder_svg(label: &str) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#e5e5e5"/><text x="100" y="105" font-family="sans-serif" font-size="16" text-anchor="middle" fill="#888">{label} not found</text></svg>"##
    )
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("/usr/bin/ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("/usr/bin/ffprobe")
}

fn default_ffmpeg_threads() -> u32 {
    12
}

fn default_codec_timeout_secs() -> u64 {
    3600
}

fn default_min_samples() -> u32 {
    4
}

fn default_max_samples() -> u32 {
    7
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("resource-service")
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024 // 512MB
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "resource-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/resources").required(false))
            .add_source(config::File::with_name("/etc/resources/resources").required(false))
            // Override with environment variables
            // RESOURCES__RESOURCES__MAX_CHECKSUM_SIZE -> resources.max_checksum_size
            .add_source(
                config::Environment::with_prefix("RESOURCES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    /// Get database connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl VideoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DownloadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            max_checksum_size: default_max_checksum_size(),
            upload_disk: default_upload_disk(),
            preview_disk: default_preview_disk(),
            allow_duplicates: false,
            resize_original: false,
            original_dimensions: OriginalDimensions::default(),
            image_preview: Vec::new(),
            file_not_found: Placeholders::default(),
            cache_quality: default_quality(),
            max_derivative_dimension: default_max_derivative_dimension(),
        }
    }
}

impl Default for OriginalDimensions {
    fn default() -> Self {
        Self {
            width: default_original_width(),
            height: default_original_height(),
            quality: default_original_quality(),
        }
    }
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            image: default_image_placeholder(),
            video: default_video_placeholder(),
            file: default_file_placeholder(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            threads: default_ffmpeg_threads(),
            timeout_secs: default_codec_timeout_secs(),
            min_samples: default_min_samples(),
            max_samples: default_max_samples(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            seed: Vec::new(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_retries(), 5);
        assert_eq!(default_retry_delay_ms(), 1000);
        assert_eq!(default_min_samples(), 4);
        assert_eq!(default_max_samples(), 7);
        assert_eq!(default_upload_disk(), "local");
    }

    #[test]
    fn test_resources_config_defaults() {
        let resources: ResourcesConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(resources.max_derivative_dimension, 4096);
        assert_eq!(resources.cache_quality, 90);

        let resources: ResourcesConfig =
            serde_json::from_str(r#"{"max_derivative_dimension": 2000}"#).unwrap();
        assert_eq!(resources.max_derivative_dimension, 2000);
    }

    #[test]
    fn test_preview_size_label() {
        let preview = PreviewDefinition {
            width: 300,
            height: 200,
            quality: 80,
            generate: true,
            default: false,
        };
        assert_eq!(preview.size_label(), "300x200");
    }

    #[test]
    fn test_disk_config_deserializes_tagged_driver() {
        let local: DiskConfig =
            serde_json::from_str(r#"{"driver": "local", "root": "/var/media"}"#).unwrap();
        assert!(matches!(local, DiskConfig::Local { .. }));

        let s3: DiskConfig =
            serde_json::from_str(r#"{"driver": "s3", "bucket": "media"}"#).unwrap();
        match s3 {
            DiskConfig::S3(cfg) => {
                assert_eq!(cfg.bucket, "media");
                assert_eq!(cfg.region, "us-east-1");
                assert_eq!(cfg.multipart_threshold_bytes, 5 * 1024 * 1024);
            }
            DiskConfig::Local { .. } => panic!("expected s3 disk"),
        }
    }

    #[test]
    fn test_placeholders_default_to_svg() {
        let placeholders = Placeholders::default();
        assert!(placeholders.image.starts_with("<svg"));
        assert!(placeholders.video.contains("video not found"));
    }
}
