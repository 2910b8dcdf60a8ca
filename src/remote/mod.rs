//! Remote object-store interface.
//!
//! The storage protocol itself lives outside this crate; the sync engine
//! only consumes this capability set. Implementations are expected to be
//! safe for concurrent calls — the engine shares one client across all
//! workers via `Arc<dyn RemoteStore>`.

pub mod error;
pub mod memory;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub use error::RemoteError;

/// A bucket (top-level namespace) in the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub id: String,
    pub name: String,
}

/// Point-in-time metadata for one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Store-assigned object identifier; changes when the object is replaced.
    pub id: String,
    pub name: String,
    pub size: u64,
    /// SHA-256 hex digest of the object content.
    pub digest: String,
    /// The store's modification marker for the object.
    pub modified_at: DateTime<Utc>,
}

/// Capability set consumed from the remote object-store client.
///
/// Object-safe so the engine can hold `Arc<dyn RemoteStore>`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_buckets(&self) -> Result<Vec<Bucket>, RemoteError>;

    async fn create_bucket(&self, name: &str) -> Result<Bucket, RemoteError>;

    /// Point-in-time listing of all objects in the bucket.
    async fn list_files(&self, bucket: &Bucket) -> Result<Vec<FileInfo>, RemoteError>;

    /// Upload the file at `local_path` under `name`, returning the stored
    /// object's metadata. The store does not overwrite by name; callers
    /// delete any stale same-name object first.
    async fn upload_file(
        &self,
        bucket: &Bucket,
        name: &str,
        local_path: &Path,
    ) -> Result<FileInfo, RemoteError>;

    /// Download `file` to `local_path`, replacing any existing content.
    async fn download_file(
        &self,
        bucket: &Bucket,
        file: &FileInfo,
        local_path: &Path,
    ) -> Result<(), RemoteError>;

    async fn delete_file(&self, bucket: &Bucket, file: &FileInfo) -> Result<(), RemoteError>;

    /// Validate and persist account credentials.
    async fn login(
        &self,
        email: &str,
        password: &str,
        encryption_key: Option<&str>,
    ) -> Result<(), RemoteError>;

    async fn create_account(&self, email: &str, password: &str) -> Result<(), RemoteError>;
}

/// SHA-256 hex digest of a byte slice — the content marker used for both
/// uploaded objects and local-file comparison during reconciliation.
pub(crate) fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let hash = hasher.finalize();
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hex_known_value() {
        // sha256("hello")
        assert_eq!(
            digest_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn digest_hex_empty() {
        assert_eq!(
            digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
