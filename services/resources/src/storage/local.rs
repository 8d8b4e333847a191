use super::ObjectStorage;
use crate::error::{ResourceError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Disk rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalDisk {
    name: String,
    root: PathBuf,
    url: Option<String>,
}

impl LocalDisk {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            url: None,
        }
    }

    /// Base URL the disk root is published under
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `path`, rejecting anything that escapes the root
    pub fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ResourceError::InvalidInput(format!(
                "Path escapes disk root: {path}"
            )));
        }

        Ok(self.root.join(relative))
    }

    fn storage_error(&self, path: &str, e: std::io::Error) -> ResourceError {
        ResourceError::Storage(format!("{} on disk {}: {}", path, self.name, e))
    }
}

#[async_trait]
impl ObjectStorage for LocalDisk {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.full_path(path)?;
        fs::try_exists(&full)
            .await
            .map_err(|e| self.storage_error(path, e))
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let full = self.full_path(path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ResourceError::NotFound {
                kind: "Object",
                id: path.to_string(),
            }),
            Err(e) => Err(self.storage_error(path, e)),
        }
    }

    async fn write(&self, path: &str, bytes: Bytes) -> Result<()> {
        let full = self.full_path(path)?;
        let write_error = |e: std::io::Error| ResourceError::StorageWrite {
            disk: self.name.clone(),
            path: path.to_string(),
            message: e.to_string(),
        };

        let parent = full
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await.map_err(write_error)?;

        // Staged beside the target and renamed over it, so readers never see
        // partial bytes. The staging file is removed on drop if anything fails.
        let size_bytes = bytes.len();
        let target = full.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut staging = tempfile::Builder::new()
                .prefix(".")
                .suffix(".tmp")
                .tempfile_in(&parent)?;
            staging.write_all(&bytes)?;
            staging.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| write_error(std::io::Error::other(e)))?
        .map_err(write_error)?;

        debug!(disk = %self.name, path = %path, size_bytes, "Object written");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => {
                debug!(disk = %self.name, path = %path, "Object deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_error(path, e)),
        }
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let full = self.full_path(path)?;
        match fs::metadata(&full).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ResourceError::NotFound {
                kind: "Object",
                id: path.to_string(),
            }),
            Err(e) => Err(self.storage_error(path, e)),
        }
    }

    fn url_for(&self, path: &str) -> Option<String> {
        self.url.as_ref().map(|base| {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        })
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;
        fs::create_dir_all(&full)
            .await
            .map_err(|e| self.storage_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let disk = LocalDisk::new("local", dir.path());

        disk.write("cache/a/b/10_10.jpg", Bytes::from_static(b"data"))
            .await
            .unwrap();

        assert!(disk.exists("cache/a/b/10_10.jpg").await.unwrap());
        assert_eq!(disk.size("cache/a/b/10_10.jpg").await.unwrap(), 4);
        assert_eq!(
            disk.read("cache/a/b/10_10.jpg").await.unwrap(),
            Bytes::from_static(b"data")
        );
    }

    #[tokio::test]
    async fn test_write_leaves_no_staging_files() {
        let dir = TempDir::new().unwrap();
        let disk = LocalDisk::new("local", dir.path());

        disk.write("a.txt", Bytes::from_static(b"one")).await.unwrap();
        disk.write("a.txt", Bytes::from_static(b"two")).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(disk.read("a.txt").await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_failed_write_removes_staging_file() {
        let dir = TempDir::new().unwrap();
        let disk = LocalDisk::new("local", dir.path());
        // a directory in the way makes the final rename fail
        std::fs::create_dir_all(dir.path().join("taken/inner")).unwrap();

        let err = disk
            .write("taken", Bytes::from_static(b"data"))
            .await
            .unwrap_err();

        assert!(matches!(err, ResourceError::StorageWrite { .. }));
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("taken")]);
        assert!(dir.path().join("taken").is_dir());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let disk = LocalDisk::new("local", dir.path());
        disk.delete("nothing/here.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let disk = LocalDisk::new("local", dir.path());
        let err = disk.read("missing.jpg").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let disk = LocalDisk::new("local", "/srv/media");
        assert!(disk.full_path("../etc/passwd").is_err());
        assert_eq!(
            disk.full_path("/uploads/a.jpg").unwrap(),
            PathBuf::from("/srv/media/uploads/a.jpg")
        );
    }

    #[tokio::test]
    async fn test_make_directory_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let disk = LocalDisk::new("local", dir.path());
        disk.make_directory("video-previews/a/b").await.unwrap();
        disk.make_directory("video-previews/a/b").await.unwrap();
        assert!(dir.path().join("video-previews/a/b").is_dir());
        assert!(disk.url_for("video-previews/a/b").is_none());
    }

    #[test]
    fn test_url_for_published_disk() {
        let disk = LocalDisk::new("public", "/srv/public").with_url("https://cdn.example.com/");
        assert_eq!(
            disk.url_for("/preview/10x10/r1.jpg").as_deref(),
            Some("https://cdn.example.com/preview/10x10/r1.jpg")
        );
    }
}
