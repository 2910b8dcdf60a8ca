//! In-process remote store backend.
//!
//! Holds buckets and object content in memory behind a mutex. Serves as the
//! binary's built-in backend and as the engine's test double: tests can
//! script transient failures and inspect operation counts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{digest_hex, Bucket, FileInfo, RemoteError};

#[derive(Default)]
struct Inner {
    buckets: Vec<Bucket>,
    /// Object content keyed by name; the engine uses a single bucket.
    files: HashMap<String, (Vec<u8>, FileInfo)>,
    next_object_id: u64,
    // Counts of injected transient failures, consumed one per call.
    fail_listings: u32,
    fail_uploads: u32,
    fail_downloads: u32,
    fail_deletes: u32,
    // Operation counters for assertions.
    uploads: u64,
    downloads: u64,
    deletes: u64,
}

/// In-memory implementation of [`super::RemoteStore`].
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Mutex poisoning only happens if a holder panicked; propagating the
        // inner state is still sound for a test/demo backend.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_injected(slot: &mut u32, op: &str) -> Result<(), RemoteError> {
        if *slot > 0 {
            *slot -= 1;
            return Err(RemoteError::Network(format!("injected {op} failure")));
        }
        Ok(())
    }

    /// Insert an object directly, bypassing upload accounting. Used by tests
    /// to stage remote-side state with a controlled modification marker.
    #[cfg(test)]
    pub fn insert_file(
        &self,
        name: &str,
        data: &[u8],
        modified_at: chrono::DateTime<Utc>,
    ) -> FileInfo {
        let mut inner = self.lock();
        inner.next_object_id += 1;
        let info = FileInfo {
            id: format!("obj-{}", inner.next_object_id),
            name: name.to_string(),
            size: data.len() as u64,
            digest: digest_hex(data),
            modified_at,
        };
        inner.files.insert(name.to_string(), (data.to_vec(), info.clone()));
        info
    }

    #[cfg(test)]
    pub fn file_data(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().files.get(name).map(|(data, _)| data.clone())
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.lock().files.contains_key(name)
    }

    #[cfg(test)]
    pub fn upload_count(&self) -> u64 {
        self.lock().uploads
    }

    #[cfg(test)]
    pub fn download_count(&self) -> u64 {
        self.lock().downloads
    }

    #[cfg(test)]
    pub fn delete_count(&self) -> u64 {
        self.lock().deletes
    }

    #[cfg(test)]
    pub fn fail_next_listings(&self, n: u32) {
        self.lock().fail_listings = n;
    }

    #[cfg(test)]
    pub fn fail_next_uploads(&self, n: u32) {
        self.lock().fail_uploads = n;
    }

    #[cfg(test)]
    pub fn fail_next_downloads(&self, n: u32) {
        self.lock().fail_downloads = n;
    }

    #[cfg(test)]
    pub fn fail_next_deletes(&self, n: u32) {
        self.lock().fail_deletes = n;
    }
}

#[async_trait]
impl super::RemoteStore for MemoryRemote {
    async fn get_buckets(&self) -> Result<Vec<Bucket>, RemoteError> {
        Ok(self.lock().buckets.clone())
    }

    async fn create_bucket(&self, name: &str) -> Result<Bucket, RemoteError> {
        let mut inner = self.lock();
        let bucket = Bucket {
            id: format!("bucket-{}", inner.buckets.len() + 1),
            name: name.to_string(),
        };
        inner.buckets.push(bucket.clone());
        Ok(bucket)
    }

    async fn list_files(&self, _bucket: &Bucket) -> Result<Vec<FileInfo>, RemoteError> {
        let mut inner = self.lock();
        Self::take_injected(&mut inner.fail_listings, "listing")?;
        let mut files: Vec<FileInfo> =
            inner.files.values().map(|(_, info)| info.clone()).collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn upload_file(
        &self,
        _bucket: &Bucket,
        name: &str,
        local_path: &Path,
    ) -> Result<FileInfo, RemoteError> {
        {
            let mut inner = self.lock();
            Self::take_injected(&mut inner.fail_uploads, "upload")?;
        }
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| RemoteError::Other(format!("cannot read {}: {e}", local_path.display())))?;

        let mut inner = self.lock();
        inner.next_object_id += 1;
        inner.uploads += 1;
        let info = FileInfo {
            id: format!("obj-{}", inner.next_object_id),
            name: name.to_string(),
            size: data.len() as u64,
            digest: digest_hex(&data),
            modified_at: Utc::now(),
        };
        inner.files.insert(name.to_string(), (data, info.clone()));
        Ok(info)
    }

    async fn download_file(
        &self,
        _bucket: &Bucket,
        file: &FileInfo,
        local_path: &Path,
    ) -> Result<(), RemoteError> {
        let data = {
            let mut inner = self.lock();
            Self::take_injected(&mut inner.fail_downloads, "download")?;
            let (data, _) = inner
                .files
                .get(&file.name)
                .ok_or_else(|| RemoteError::NotFound(file.name.clone()))?;
            let data = data.clone();
            inner.downloads += 1;
            data
        };
        tokio::fs::write(local_path, data).await.map_err(|e| {
            RemoteError::Other(format!("cannot write {}: {e}", local_path.display()))
        })?;
        Ok(())
    }

    async fn delete_file(&self, _bucket: &Bucket, file: &FileInfo) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        Self::take_injected(&mut inner.fail_deletes, "delete")?;
        if inner.files.remove(&file.name).is_none() {
            return Err(RemoteError::NotFound(file.name.clone()));
        }
        inner.deletes += 1;
        Ok(())
    }

    async fn login(
        &self,
        email: &str,
        password: &str,
        _encryption_key: Option<&str>,
    ) -> Result<(), RemoteError> {
        if email.is_empty() || password.is_empty() {
            return Err(RemoteError::Auth("missing credentials".into()));
        }
        Ok(())
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<(), RemoteError> {
        if email.is_empty() || password.is_empty() {
            return Err(RemoteError::Auth("missing credentials".into()));
        }
        Ok(())
    }
}
