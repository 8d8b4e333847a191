use crate::error::Result;
use crate::model::{Resource, ResourceFilter};
use crate::repository::ResourceRepository;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Content hash lookup used for upload deduplication.
///
/// Hashing is bounded by `max_checksum_size`: larger files are never hashed and
/// therefore never deduplicated.
#[derive(Clone)]
pub struct ChecksumIndex {
    repository: Arc<dyn ResourceRepository>,
    max_checksum_size: u64,
}

impl ChecksumIndex {
    pub fn new(repository: Arc<dyn ResourceRepository>, max_checksum_size: u64) -> Self {
        Self {
            repository,
            max_checksum_size,
        }
    }

    /// SHA-256 of the content as 64 lowercase hex characters
    pub fn compute_checksum(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Whether a file of `size` bytes is hashed at all
    pub fn should_checksum(&self, size: u64) -> bool {
        size <= self.max_checksum_size
    }

    /// Digest of `bytes` when they are under the threshold
    pub fn checksum_for(&self, bytes: &[u8]) -> Option<String> {
        if self.should_checksum(bytes.len() as u64) {
            Some(Self::compute_checksum(bytes))
        } else {
            None
        }
    }

    /// Find a live, non-preserved resource with the given digest
    pub async fn find_by_checksum(&self, digest: &str) -> Result<Option<Resource>> {
        let filter = ResourceFilter {
            preserve: Some(false),
            ..ResourceFilter::by_checksum(digest)
        };

        let found = self.repository.find_one_by(&filter).await?;

        if let Some(ref resource) = found {
            debug!(checksum = %digest, resource_id = %resource.id, "Checksum match found");
        }

        Ok(found)
    }

    pub fn max_checksum_size(&self) -> u64 {
        self.max_checksum_size
    }
}
