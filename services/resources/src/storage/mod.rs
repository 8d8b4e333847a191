//! Object storage per named disk.
//!
//! A disk is either a directory on the local filesystem ([`LocalDisk`]) or an
//! S3 compatible bucket ([`S3Disk`]). Writes are atomic-or-absent: a failed
//! write never leaves a truncated object behind, which is what lets derivative
//! existence act as the cache index.

use crate::config::DiskConfig;
use crate::error::{ResourceError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

mod local;
mod s3;

pub use local::LocalDisk;
pub use s3::S3Disk;

/// Storage operations on one disk. Paths are relative to the disk root and use
/// `/` separators.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Disk name, used in logs and errors
    fn name(&self) -> &str;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Store `bytes` at `path`, creating parent directories as needed
    async fn write(&self, path: &str, bytes: Bytes) -> Result<()>;

    /// Remove the object; a missing object is not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Size in bytes
    async fn size(&self, path: &str) -> Result<u64>;

    /// Public URL, only for remote disks
    fn url_for(&self, path: &str) -> Option<String>;

    /// Idempotent directory creation; a no-op for flat key spaces
    async fn make_directory(&self, path: &str) -> Result<()>;
}

/// Registry of the configured disks
#[derive(Clone, Default)]
pub struct Disks {
    disks: HashMap<String, Arc<dyn ObjectStorage>>,
}

impl Disks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every disk named in the configuration
    pub async fn from_config(config: &HashMap<String, DiskConfig>) -> anyhow::Result<Self> {
        let mut disks = Self::new();

        for (name, disk_config) in config {
            let disk: Arc<dyn ObjectStorage> = match disk_config {
                DiskConfig::Local { root, url } => {
                    let local = LocalDisk::new(name.clone(), root.clone());
                    Arc::new(match url {
                        Some(url) => local.with_url(url.clone()),
                        None => local,
                    })
                }
                DiskConfig::S3(s3_config) => Arc::new(S3Disk::new(name.clone(), s3_config).await?),
            };
            info!(disk = %name, "Storage disk registered");
            disks.register(disk);
        }

        Ok(disks)
    }

    /// Add or replace a disk under its own name
    pub fn register(&mut self, disk: Arc<dyn ObjectStorage>) {
        self.disks.insert(disk.name().to_string(), disk);
    }

    pub fn with_disk(mut self, disk: Arc<dyn ObjectStorage>) -> Self {
        self.register(disk);
        self
    }

    pub fn disk(&self, name: &str) -> Result<Arc<dyn ObjectStorage>> {
        self.disks
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::InvalidInput(format!("Unknown disk: {name}")))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.disks.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_disk_is_invalid_input() {
        let disks = Disks::new();
        let err = disks.disk("missing").err().unwrap();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_from_config_registers_local_disks() {
        let dir = TempDir::new().unwrap();
        let mut config = HashMap::new();
        config.insert(
            "local".to_string(),
            DiskConfig::Local {
                root: dir.path().to_path_buf(),
                url: None,
            },
        );
        config.insert(
            "public".to_string(),
            DiskConfig::Local {
                root: dir.path().join("public"),
                url: Some("https://cdn.example.com".to_string()),
            },
        );

        let disks = Disks::from_config(&config).await.unwrap();
        assert_eq!(disks.names(), vec!["local".to_string(), "public".to_string()]);
        assert_eq!(disks.disk("public").unwrap().name(), "public");
        assert_eq!(
            disks.disk("public").unwrap().url_for("a.jpg").as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
        assert!(disks.disk("local").unwrap().url_for("a.jpg").is_none());
    }
}
