//! Durable sync state store backed by SQLite.
//!
//! Every state transition is written through to disk before the engine
//! acts on it, so a crash can lose at most the action, never the record
//! of intent. The next reconciliation pass re-derives the action from
//! the stored state.

pub mod error;
pub mod schema;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

pub use error::StoreError;
pub use types::{CloudData, LocalData, StoreSummary, SyncRecord, SyncState};

/// Trait for sync state store operations.
///
/// Object-safe so the engine can share an `Arc<dyn SyncStore>` across
/// workers. The `set_*` helpers are the only way tasks and reconciliation
/// change states; they read-modify-write one record so observations on
/// the untouched side survive the transition.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Fetch one record by name.
    async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StoreError>;

    /// Insert or replace one record.
    async fn upsert(&self, record: &SyncRecord) -> Result<(), StoreError>;

    /// Remove one record. Removing a missing name is a no-op.
    async fn remove(&self, name: &str) -> Result<(), StoreError>;

    /// All records, ordered by name.
    async fn list_all(&self) -> Result<Vec<SyncRecord>, StoreError>;

    /// Durability barrier: flush completed writes to the main database
    /// file. Individual writes are already durable under WAL; this bounds
    /// how much replay a crash leaves in the log.
    async fn commit(&self) -> Result<(), StoreError>;

    /// Aggregate counts for status reporting.
    async fn summary(&self) -> Result<StoreSummary, StoreError>;

    /// Fetch a record, creating a bare `New` one if the name is unknown.
    async fn get_or_create(&self, name: &str) -> Result<SyncRecord, StoreError> {
        match self.get(name).await? {
            Some(record) => Ok(record),
            None => Ok(SyncRecord::new(name)),
        }
    }

    /// Mark local content for upload, refreshing the local observation.
    /// Any recorded cloud observation is kept for stale-copy cleanup.
    async fn set_for_upload(&self, name: &str, local: LocalData) -> Result<(), StoreError> {
        let mut record = self.get_or_create(name).await?;
        record.state = SyncState::ForUpload;
        record.local = Some(local);
        self.upsert(&record).await
    }

    /// Mark remote content for download, refreshing the cloud observation.
    async fn set_for_download(&self, name: &str, cloud: CloudData) -> Result<(), StoreError> {
        let mut record = self.get_or_create(name).await?;
        record.state = SyncState::ForDownload;
        record.cloud = Some(cloud);
        self.upsert(&record).await
    }

    /// Record a completed transfer: both sides observed and matching.
    async fn set_synced(
        &self,
        name: &str,
        local: LocalData,
        cloud: CloudData,
    ) -> Result<(), StoreError> {
        let record = SyncRecord {
            name: name.to_string(),
            state: SyncState::Synced,
            local: Some(local),
            cloud: Some(cloud),
        };
        self.upsert(&record).await
    }

    async fn set_upload_failed(&self, name: &str) -> Result<(), StoreError> {
        let mut record = self.get_or_create(name).await?;
        record.state = SyncState::UploadFailed;
        self.upsert(&record).await
    }

    async fn set_download_failed(&self, name: &str) -> Result<(), StoreError> {
        let mut record = self.get_or_create(name).await?;
        record.state = SyncState::DownloadFailed;
        self.upsert(&record).await
    }

    /// The remote copy is gone; the local copy should follow. Both
    /// observations are kept until the record is removed, so the last
    /// known remote metadata stays available while the delete is pending.
    async fn set_for_local_delete(&self, name: &str) -> Result<(), StoreError> {
        let mut record = self.get_or_create(name).await?;
        record.state = SyncState::ForLocalDelete;
        self.upsert(&record).await
    }

    /// The local copy is gone; the remote copy should follow. The cloud
    /// observation is what the delete task acts on; the local one records
    /// the copy that disappeared.
    async fn set_for_cloud_delete(&self, name: &str) -> Result<(), StoreError> {
        let mut record = self.get_or_create(name).await?;
        record.state = SyncState::ForCloudDelete;
        self.upsert(&record).await
    }

    /// Record divergent edits on both sides, pending resolution.
    async fn set_conflict(
        &self,
        name: &str,
        local: LocalData,
        cloud: CloudData,
    ) -> Result<(), StoreError> {
        let record = SyncRecord {
            name: name.to_string(),
            state: SyncState::Conflict,
            local: Some(local),
            cloud: Some(cloud),
        };
        self.upsert(&record).await
    }
}

/// SQLite implementation of the sync state store.
pub struct SqliteSyncStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    /// Statements here are short and never held across awaits.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteSyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSyncStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteSyncStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

        // Enable WAL mode for better concurrent read/write performance
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::Migration)?;

        // Use NORMAL synchronous mode for better performance
        // (still safe with WAL mode)
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StoreError::Migration)?;

        schema::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }
}

#[async_trait]
impl SyncStore for SqliteSyncStore {
    async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        conn.query_row(
            "SELECT name, state, local_modified_at, local_size, cloud_id, cloud_size, cloud_digest, cloud_modified_at FROM sync_files WHERE name = ?1",
            [name],
            row_to_sync_record,
        )
        .optional()
        .map_err(StoreError::query)
    }

    async fn upsert(&self, record: &SyncRecord) -> Result<(), StoreError> {
        if record.state.needs_local_data() && record.local.is_none() {
            tracing::warn!(name = %record.name, state = ?record.state, "State implies a local observation but none is recorded");
        }
        if record.state.needs_cloud_data() && record.cloud.is_none() {
            tracing::warn!(name = %record.name, state = ?record.state, "State implies a cloud observation but none is recorded");
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO sync_files (name, state, local_modified_at, local_size, cloud_id, cloud_size, cloud_digest, cloud_modified_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(name) DO UPDATE SET
                state = excluded.state,
                local_modified_at = excluded.local_modified_at,
                local_size = excluded.local_size,
                cloud_id = excluded.cloud_id,
                cloud_size = excluded.cloud_size,
                cloud_digest = excluded.cloud_digest,
                cloud_modified_at = excluded.cloud_modified_at
            "#,
            rusqlite::params![
                &record.name,
                record.state.as_str(),
                record.local.map(|l| l.modified_at.timestamp()),
                record.local.map(|l| l.size as i64),
                record.cloud.as_ref().map(|c| &c.id),
                record.cloud.as_ref().map(|c| c.size as i64),
                record.cloud.as_ref().map(|c| &c.digest),
                record.cloud.as_ref().map(|c| c.modified_at.timestamp()),
            ],
        )
        .map_err(StoreError::query)?;

        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        conn.execute("DELETE FROM sync_files WHERE name = ?1", [name])
            .map_err(StoreError::query)?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<SyncRecord>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT name, state, local_modified_at, local_size, cloud_id, cloud_size, cloud_digest, cloud_modified_at FROM sync_files ORDER BY name",
            )
            .map_err(StoreError::query)?;

        let records = stmt
            .query_map([], row_to_sync_record)
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;

        Ok(records)
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        // Returns a (busy, log, checkpointed) row; a no-op outside WAL mode.
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
            .map_err(StoreError::query)?;

        Ok(())
    }

    async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut stmt = conn
            .prepare_cached("SELECT state, COUNT(*) FROM sync_files GROUP BY state")
            .map_err(StoreError::query)?;

        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;

        let mut summary = StoreSummary::default();
        for (state_str, count) in counts {
            let count = count as u64;
            summary.total += count;
            match SyncState::from_str(&state_str) {
                Some(SyncState::Synced) => summary.synced += count,
                Some(
                    SyncState::New
                    | SyncState::ForUpload
                    | SyncState::Modified
                    | SyncState::ForDownload,
                ) => summary.pending += count,
                Some(SyncState::UploadFailed | SyncState::DownloadFailed) => {
                    summary.failed += count
                }
                Some(SyncState::ForLocalDelete | SyncState::ForCloudDelete) => {
                    summary.deleting += count
                }
                Some(SyncState::Conflict) => summary.conflicts += count,
                None => {
                    tracing::warn!("Unknown state '{}' in store, counting as total only", state_str)
                }
            }
        }

        Ok(summary)
    }
}

/// Convert a database row to a SyncRecord.
fn row_to_sync_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
    let name: String = row.get(0)?;
    let state_str: String = row.get(1)?;
    let local_modified_at: Option<i64> = row.get(2)?;
    let local_size: Option<i64> = row.get(3)?;
    let cloud_id: Option<String> = row.get(4)?;
    let cloud_size: Option<i64> = row.get(5)?;
    let cloud_digest: Option<String> = row.get(6)?;
    let cloud_modified_at: Option<i64> = row.get(7)?;

    let local = match (local_modified_at, local_size) {
        (Some(ts), Some(size)) => Some(LocalData {
            modified_at: timestamp(ts),
            size: size as u64,
        }),
        _ => None,
    };

    let cloud = match (cloud_id, cloud_size, cloud_digest, cloud_modified_at) {
        (Some(id), Some(size), Some(digest), Some(ts)) => Some(CloudData {
            id,
            size: size as u64,
            digest,
            modified_at: timestamp(ts),
        }),
        _ => None,
    };

    Ok(SyncRecord {
        name,
        state: SyncState::from_str(&state_str).unwrap_or(SyncState::New),
        local,
        cloud,
    })
}

fn timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or(DateTime::UNIX_EPOCH)
}
