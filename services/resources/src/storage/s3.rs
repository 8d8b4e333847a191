use super::ObjectStorage;
use crate::config::S3DiskConfig;
use crate::error::{ResourceError, Result};
use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

/// Disk backed by an S3 compatible bucket
pub struct S3Disk {
    name: String,
    client: S3Client,
    bucket: String,
    config: S3DiskConfig,
}

impl S3Disk {
    /// Create a new S3 disk
    pub async fn new(name: String, config: &S3DiskConfig) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            disk = %name,
            bucket = %config.bucket,
            region = %config.region,
            "S3 disk initialized"
        );

        Ok(Self {
            name,
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    fn key(path: &str) -> &str {
        path.trim_start_matches('/')
    }

    fn write_error(&self, path: &str, e: impl std::fmt::Display) -> ResourceError {
        ResourceError::StorageWrite {
            disk: self.name.clone(),
            path: path.to_string(),
            message: e.to_string(),
        }
    }

    /// Single-part upload for small objects
    async fn simple_upload(&self, key: &str, bytes: Bytes) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type_for(key))
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }

    /// Multipart upload for large objects; aborted on failure so no partial object remains
    async fn multipart_upload(&self, key: &str, bytes: Bytes) -> anyhow::Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(key))
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?
            .to_string();

        let result = self.upload_parts(key, &upload_id, &bytes).await;

        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(key = %key, error = %e, "Failed to abort multipart upload");
            }
        }

        result
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, bytes: &Bytes) -> anyhow::Result<()> {
        let mut completed_parts = Vec::new();
        let part_size = self.config.part_size_bytes.max(1);
        let mut part_number = 1;

        for offset in (0..bytes.len()).step_by(part_size) {
            let end = (offset + part_size).min(bytes.len());
            let body = ByteStream::from(bytes.slice(offset..end));

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .context("Failed to upload part")?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for S3Disk {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(Self::key(path))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(ResourceError::Storage(format!(
                        "Failed to check existence of {path}: {e}"
                    )))
                }
            }
        }
    }

    #[instrument(skip(self), fields(disk = %self.name))]
    async fn read(&self, path: &str) -> Result<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(path))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    ResourceError::NotFound {
                        kind: "Object",
                        id: path.to_string(),
                    }
                } else {
                    ResourceError::Storage(format!("Failed to read {path}: {e}"))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| ResourceError::Storage(format!("Failed to read body of {path}: {e}")))?;

        Ok(data.into_bytes())
    }

    #[instrument(skip(self, bytes), fields(disk = %self.name, size_bytes = bytes.len()))]
    async fn write(&self, path: &str, bytes: Bytes) -> Result<()> {
        let key = Self::key(path);

        // Check if we should use multipart upload
        let result = if bytes.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, bytes).await
        } else {
            self.simple_upload(key, bytes).await
        };

        result.map_err(|e| self.write_error(path, format!("{e:#}")))?;

        debug!(key = %key, "Object uploaded to S3");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        // S3 treats deleting a missing key as success
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(Self::key(path))
            .send()
            .await
            .map_err(|e| ResourceError::Storage(format!("Failed to delete {path}: {e}")))?;

        debug!(disk = %self.name, path = %path, "Object deleted from S3");
        Ok(())
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(Self::key(path))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    ResourceError::NotFound {
                        kind: "Object",
                        id: path.to_string(),
                    }
                } else {
                    ResourceError::Storage(format!("Failed to stat {path}: {e}"))
                }
            })?;

        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }

    fn url_for(&self, path: &str) -> Option<String> {
        let key = Self::key(path);
        match (&self.config.public_url, &self.config.endpoint_url) {
            (Some(base), _) => Some(format!("{}/{}", base.trim_end_matches('/'), key)),
            (None, Some(endpoint)) => Some(format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                key
            )),
            (None, None) => Some(format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.config.region, key
            )),
        }
    }

    async fn make_directory(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

/// Content type recorded on uploaded objects
fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
