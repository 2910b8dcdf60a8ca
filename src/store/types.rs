//! Types for the sync state store.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};

use crate::remote::FileInfo;

/// Sync state of one file name.
///
/// The state plus the recorded local/cloud observations fully determine
/// what the next reconciliation pass does with the name. The `*Failed`
/// states keep a file in scope without letting it loop hot; the next
/// pass decides whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Record exists but no direction has been decided yet.
    New,
    /// Local content should be pushed to the remote store.
    ForUpload,
    /// The last upload attempt failed.
    UploadFailed,
    /// Local and remote copies match as of the last observation.
    Synced,
    /// The local copy changed after being synced.
    Modified,
    /// Remote content should be pulled down.
    ForDownload,
    /// The last download attempt failed.
    DownloadFailed,
    /// The remote copy disappeared; the local copy should be removed.
    ForLocalDelete,
    /// The local copy disappeared; the remote copy should be removed.
    ForCloudDelete,
    /// Both sides changed independently; a resolution is pending.
    Conflict,
}

impl SyncState {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::ForUpload => "for_upload",
            Self::UploadFailed => "upload_failed",
            Self::Synced => "synced",
            Self::Modified => "modified",
            Self::ForDownload => "for_download",
            Self::DownloadFailed => "download_failed",
            Self::ForLocalDelete => "for_local_delete",
            Self::ForCloudDelete => "for_cloud_delete",
            Self::Conflict => "conflict",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "for_upload" => Some(Self::ForUpload),
            "upload_failed" => Some(Self::UploadFailed),
            "synced" => Some(Self::Synced),
            "modified" => Some(Self::Modified),
            "for_download" => Some(Self::ForDownload),
            "download_failed" => Some(Self::DownloadFailed),
            "for_local_delete" => Some(Self::ForLocalDelete),
            "for_cloud_delete" => Some(Self::ForCloudDelete),
            "conflict" => Some(Self::Conflict),
            _ => None,
        }
    }

    /// States that imply a recorded local observation. A pending cloud
    /// delete keeps the local observation of the copy that disappeared.
    pub fn needs_local_data(&self) -> bool {
        matches!(
            self,
            Self::ForUpload | Self::UploadFailed | Self::Modified | Self::ForCloudDelete
        )
    }

    /// States that imply a recorded cloud observation. A pending local
    /// delete keeps the last known metadata of the vanished remote copy.
    pub fn needs_cloud_data(&self) -> bool {
        matches!(
            self,
            Self::ForDownload | Self::DownloadFailed | Self::ForLocalDelete
        )
    }
}

/// Last recorded observation of the local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalData {
    /// Modification time, truncated to whole seconds so that values
    /// round-trip through the database unchanged.
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

impl LocalData {
    /// Observe the file at `path` via filesystem metadata.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let modified: DateTime<Utc> = meta.modified()?.into();
        let modified_at = Utc
            .timestamp_opt(modified.timestamp(), 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);
        Ok(Self {
            modified_at,
            size: meta.len(),
        })
    }
}

/// Last recorded metadata of the remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudData {
    pub id: String,
    pub size: u64,
    pub digest: String,
    pub modified_at: DateTime<Utc>,
}

impl From<FileInfo> for CloudData {
    fn from(info: FileInfo) -> Self {
        Self {
            id: info.id,
            size: info.size,
            digest: info.digest,
            modified_at: info.modified_at,
        }
    }
}

impl CloudData {
    /// Rebuild the remote-side handle for delete and download calls.
    pub fn to_file_info(&self, name: &str) -> FileInfo {
        FileInfo {
            id: self.id.clone(),
            name: name.to_string(),
            size: self.size,
            digest: self.digest.clone(),
            modified_at: self.modified_at,
        }
    }
}

/// One file's durable sync record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub name: String,
    pub state: SyncState,
    pub local: Option<LocalData>,
    pub cloud: Option<CloudData>,
}

impl SyncRecord {
    /// A fresh record with no observations on either side.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: SyncState::New,
            local: None,
            cloud: None,
        }
    }
}

/// Aggregate counts over the store, grouped by what the states mean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub total: u64,
    pub synced: u64,
    /// ForUpload, Modified, ForDownload, New.
    pub pending: u64,
    /// UploadFailed, DownloadFailed.
    pub failed: u64,
    /// ForLocalDelete, ForCloudDelete.
    pub deleting: u64,
    pub conflicts: u64,
}
