//! Sync tasks and their execution.
//!
//! A task acts on the state recorded for one name. Remote failures never
//! escape a task; they become a `*Failed` transition that the next
//! reconciliation pass re-drives. Only state store failures propagate,
//! since losing the ability to record outcomes makes further work unsafe.

use std::path::PathBuf;

use crate::remote::{FileInfo, RemoteError};
use crate::retry::retry_with_backoff;
use crate::store::{LocalData, StoreError, SyncState};

use super::{classify_remote, reconcile, SyncContext, PART_SUFFIX};

/// Work item key used for queue deduplication.
///
/// All file tasks for one name share a key, so at most one operation per
/// name is pending or running at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    CheckState,
    File(String),
}

/// A unit of sync work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Full reconciliation pass over local dir, remote listing, and store.
    CheckState,
    Upload { name: String },
    Download { name: String },
    DeleteLocal { name: String },
    DeleteCloud { name: String },
}

impl Task {
    pub fn key(&self) -> TaskKey {
        match self {
            Task::CheckState => TaskKey::CheckState,
            Task::Upload { name }
            | Task::Download { name }
            | Task::DeleteLocal { name }
            | Task::DeleteCloud { name } => TaskKey::File(name.clone()),
        }
    }

    pub async fn run(&self, ctx: &SyncContext) -> Result<(), StoreError> {
        match self {
            Task::CheckState => reconcile::run_check_state(ctx).await,
            Task::Upload { name } => upload(ctx, name).await,
            Task::Download { name } => download(ctx, name).await,
            Task::DeleteLocal { name } => delete_local(ctx, name).await,
            Task::DeleteCloud { name } => delete_cloud(ctx, name).await,
        }
    }
}

/// Push local content to the remote store.
///
/// The store does not overwrite by name, so any stale same-name object is
/// probed for and deleted first. The upload itself gets a single attempt;
/// re-driving a failed upload is the reconciliation pass's job.
async fn upload(ctx: &SyncContext, name: &str) -> Result<(), StoreError> {
    let Some(record) = ctx.store.get(name).await? else {
        tracing::debug!(name = %name, "Upload task for unknown record, skipping");
        return Ok(());
    };
    if !matches!(
        record.state,
        SyncState::ForUpload | SyncState::Modified | SyncState::New
    ) {
        tracing::debug!(name = %name, state = record.state.as_str(), "Record no longer marked for upload, skipping");
        return Ok(());
    }

    let path = ctx.sync_dir.join(name);
    // Observe before transferring: if the file changes mid-upload the next
    // pass sees a newer mtime than the one recorded here and re-uploads.
    let local = match LocalData::read(&path) {
        Ok(local) => local,
        Err(e) => {
            tracing::warn!(name = %name, error = %e, "Cannot read local file for upload");
            ctx.store.set_upload_failed(name).await?;
            ctx.store.commit().await?;
            return Ok(());
        }
    };

    if let Err(e) = delete_stale_remote_copy(ctx, name).await {
        tracing::warn!(name = %name, error = %e, transient = e.is_transient(), "Failed to clear stale remote copy");
        ctx.store.set_upload_failed(name).await?;
        ctx.store.commit().await?;
        return Ok(());
    }

    match ctx.remote.upload_file(&ctx.bucket, name, &path).await {
        Ok(info) => {
            tracing::info!(name = %name, size = info.size, "Uploaded");
            ctx.store.set_synced(name, local, info.into()).await?;
        }
        Err(e) => {
            tracing::warn!(name = %name, error = %e, transient = e.is_transient(), "Upload failed");
            ctx.store.set_upload_failed(name).await?;
        }
    }
    ctx.store.commit().await
}

/// Probe for an existing remote object under `name` and delete it.
async fn delete_stale_remote_copy(ctx: &SyncContext, name: &str) -> Result<(), RemoteError> {
    let listing = retry_with_backoff(&ctx.probe_retry, classify_remote, || {
        ctx.remote.list_files(&ctx.bucket)
    })
    .await?;

    let Some(existing) = listing.into_iter().find(|f| f.name == name) else {
        return Ok(());
    };

    tracing::debug!(name = %name, id = %existing.id, "Deleting stale remote copy before upload");
    let result = retry_with_backoff(&ctx.probe_retry, classify_remote, || {
        ctx.remote.delete_file(&ctx.bucket, &existing)
    })
    .await;

    match result {
        Ok(()) | Err(RemoteError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Pull remote content down to the sync directory.
///
/// Writes to a temporary `.bspart` file and renames into place, so a
/// crashed or failed download never leaves a half-written file under the
/// synced name.
async fn download(ctx: &SyncContext, name: &str) -> Result<(), StoreError> {
    let Some(record) = ctx.store.get(name).await? else {
        tracing::debug!(name = %name, "Download task for unknown record, skipping");
        return Ok(());
    };
    if record.state != SyncState::ForDownload || record.cloud.is_none() {
        tracing::debug!(name = %name, state = record.state.as_str(), "Record no longer marked for download, skipping");
        return Ok(());
    }

    // Re-probe the listing for a fresh handle; the recorded one may be
    // stale if the object was replaced since the last pass.
    let info = match probe_remote_file(ctx, name).await {
        Ok(Some(info)) => info,
        Ok(None) => {
            tracing::warn!(name = %name, "Remote file disappeared before download");
            ctx.store.set_download_failed(name).await?;
            ctx.store.commit().await?;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(name = %name, error = %e, transient = e.is_transient(), "Cannot probe remote file for download");
            ctx.store.set_download_failed(name).await?;
            ctx.store.commit().await?;
            return Ok(());
        }
    };

    let final_path = ctx.sync_dir.join(name);
    let part_path = part_path_for(&final_path);

    match fetch_to_part(ctx, &info, &part_path, &final_path).await {
        Ok(local) => {
            tracing::info!(name = %name, size = local.size, "Downloaded");
            ctx.store.set_synced(name, local, info.into()).await?;
        }
        Err(e) => {
            tracing::warn!(name = %name, error = %e, "Download failed");
            let _ = tokio::fs::remove_file(&part_path).await;
            ctx.store.set_download_failed(name).await?;
        }
    }
    ctx.store.commit().await
}

async fn probe_remote_file(
    ctx: &SyncContext,
    name: &str,
) -> Result<Option<FileInfo>, RemoteError> {
    let listing = retry_with_backoff(&ctx.probe_retry, classify_remote, || {
        ctx.remote.list_files(&ctx.bucket)
    })
    .await?;
    Ok(listing.into_iter().find(|f| f.name == name))
}

async fn fetch_to_part(
    ctx: &SyncContext,
    info: &FileInfo,
    part_path: &std::path::Path,
    final_path: &std::path::Path,
) -> Result<LocalData, anyhow::Error> {
    ctx.remote
        .download_file(&ctx.bucket, info, part_path)
        .await?;
    tokio::fs::rename(part_path, final_path).await?;
    Ok(LocalData::read(final_path)?)
}

fn part_path_for(final_path: &std::path::Path) -> PathBuf {
    let mut s = final_path.as_os_str().to_os_string();
    s.push(PART_SUFFIX);
    PathBuf::from(s)
}

/// Remove the local copy after the remote one disappeared.
async fn delete_local(ctx: &SyncContext, name: &str) -> Result<(), StoreError> {
    let Some(record) = ctx.store.get(name).await? else {
        return Ok(());
    };
    if record.state != SyncState::ForLocalDelete {
        tracing::debug!(name = %name, state = record.state.as_str(), "Record no longer marked for local delete, skipping");
        return Ok(());
    }

    let path = ctx.sync_dir.join(name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            // Keep the state; the next pass retries the delete.
            tracing::warn!(name = %name, error = %e, "Failed to delete local file");
            return Ok(());
        }
    }
    tracing::info!(name = %name, "Deleted local file");
    ctx.store.remove(name).await?;
    ctx.store.commit().await
}

/// Remove the remote copy after the local one disappeared.
async fn delete_cloud(ctx: &SyncContext, name: &str) -> Result<(), StoreError> {
    let Some(record) = ctx.store.get(name).await? else {
        return Ok(());
    };
    if record.state != SyncState::ForCloudDelete {
        tracing::debug!(name = %name, state = record.state.as_str(), "Record no longer marked for cloud delete, skipping");
        return Ok(());
    }
    let Some(cloud) = record.cloud else {
        // Nothing on either side; drop the record.
        ctx.store.remove(name).await?;
        return ctx.store.commit().await;
    };

    let info = cloud.to_file_info(name);
    match ctx.remote.delete_file(&ctx.bucket, &info).await {
        Ok(()) | Err(RemoteError::NotFound(_)) => {
            tracing::info!(name = %name, "Deleted remote file");
            ctx.store.remove(name).await?;
            ctx.store.commit().await
        }
        Err(e) => {
            // Keep the state; the next pass retries the delete.
            tracing::warn!(name = %name, error = %e, transient = e.is_transient(), "Failed to delete remote file");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::test_env;
    use crate::remote::RemoteStore as _;
    use crate::store::CloudData;
    use chrono::Utc;
    use std::fs;

    #[tokio::test]
    async fn upload_marks_synced_and_stores_content() {
        let env = test_env("task_upload_synced");
        let path = env.dir.join("a.txt");
        fs::write(&path, b"hello").unwrap();

        let local = LocalData::read(&path).unwrap();
        env.ctx.store.set_for_upload("a.txt", local).await.unwrap();

        Task::Upload {
            name: "a.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        let record = env.ctx.store.get("a.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::Synced);
        assert!(record.cloud.is_some());
        assert_eq!(env.remote.file_data("a.txt"), Some(b"hello".to_vec()));
        assert_eq!(env.remote.upload_count(), 1);
    }

    #[tokio::test]
    async fn upload_replaces_stale_remote_copy() {
        let env = test_env("task_upload_replaces");
        env.remote.insert_file("a.txt", b"old", Utc::now());

        let path = env.dir.join("a.txt");
        fs::write(&path, b"new content").unwrap();
        let local = LocalData::read(&path).unwrap();
        env.ctx.store.set_for_upload("a.txt", local).await.unwrap();

        Task::Upload {
            name: "a.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        assert_eq!(env.remote.file_data("a.txt"), Some(b"new content".to_vec()));
        assert_eq!(env.remote.delete_count(), 1);
    }

    #[tokio::test]
    async fn upload_failure_marks_upload_failed() {
        let env = test_env("task_upload_failed");
        let path = env.dir.join("a.txt");
        fs::write(&path, b"hello").unwrap();
        let local = LocalData::read(&path).unwrap();
        env.ctx.store.set_for_upload("a.txt", local).await.unwrap();

        env.remote.fail_next_uploads(1);

        Task::Upload {
            name: "a.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        let record = env.ctx.store.get("a.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::UploadFailed);
        // Local observation survives the failure
        assert!(record.local.is_some());
    }

    #[tokio::test]
    async fn upload_missing_local_file_marks_failed() {
        let env = test_env("task_upload_missing_local");
        env.ctx
            .store
            .set_for_upload(
                "gone.txt",
                LocalData {
                    modified_at: Utc::now(),
                    size: 1,
                },
            )
            .await
            .unwrap();

        Task::Upload {
            name: "gone.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        let record = env.ctx.store.get("gone.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::UploadFailed);
        assert_eq!(env.remote.upload_count(), 0);
    }

    #[tokio::test]
    async fn upload_skips_when_state_moved_on() {
        let env = test_env("task_upload_skips");
        let path = env.dir.join("a.txt");
        fs::write(&path, b"hello").unwrap();
        let local = LocalData::read(&path).unwrap();
        let cloud = CloudData {
            id: "obj-9".into(),
            size: 5,
            digest: "d".into(),
            modified_at: Utc::now(),
        };
        env.ctx
            .store
            .set_synced("a.txt", local, cloud)
            .await
            .unwrap();

        Task::Upload {
            name: "a.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        assert_eq!(env.remote.upload_count(), 0);
    }

    #[tokio::test]
    async fn download_writes_file_and_marks_synced() {
        let env = test_env("task_download_synced");
        let info = env.remote.insert_file("b.txt", b"remote bytes", Utc::now());
        env.ctx
            .store
            .set_for_download("b.txt", info.into())
            .await
            .unwrap();

        Task::Download {
            name: "b.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        assert_eq!(fs::read(env.dir.join("b.txt")).unwrap(), b"remote bytes");
        let record = env.ctx.store.get("b.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::Synced);
        assert!(record.local.is_some());
        // No leftover partial file
        assert!(!env.dir.join("b.txt.bspart").exists());
    }

    #[tokio::test]
    async fn download_failure_leaves_no_partial_file() {
        let env = test_env("task_download_failed");
        let info = env.remote.insert_file("b.txt", b"remote bytes", Utc::now());
        env.ctx
            .store
            .set_for_download("b.txt", info.into())
            .await
            .unwrap();

        // Probe retries once, then the download attempt itself fails
        env.remote.fail_next_downloads(1);

        Task::Download {
            name: "b.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        let record = env.ctx.store.get("b.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::DownloadFailed);
        assert!(!env.dir.join("b.txt").exists());
        assert!(!env.dir.join("b.txt.bspart").exists());
    }

    #[tokio::test]
    async fn download_of_vanished_remote_marks_failed() {
        let env = test_env("task_download_vanished");
        let info = env.remote.insert_file("b.txt", b"x", Utc::now());
        env.ctx
            .store
            .set_for_download("b.txt", info.clone().into())
            .await
            .unwrap();
        env.remote.delete_file(&env.ctx.bucket, &info).await.unwrap();

        Task::Download {
            name: "b.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        let record = env.ctx.store.get("b.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::DownloadFailed);
    }

    #[tokio::test]
    async fn delete_local_removes_file_and_record() {
        let env = test_env("task_delete_local");
        let path = env.dir.join("c.txt");
        fs::write(&path, b"doomed").unwrap();
        env.ctx.store.set_for_local_delete("c.txt").await.unwrap();

        Task::DeleteLocal {
            name: "c.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        assert!(!path.exists());
        assert!(env.ctx.store.get("c.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_local_of_missing_file_still_clears_record() {
        let env = test_env("task_delete_local_missing");
        env.ctx.store.set_for_local_delete("c.txt").await.unwrap();

        Task::DeleteLocal {
            name: "c.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        assert!(env.ctx.store.get("c.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cloud_removes_object_and_record() {
        let env = test_env("task_delete_cloud");
        let info = env.remote.insert_file("d.txt", b"bye", Utc::now());
        env.ctx
            .store
            .set_for_download("d.txt", info.into())
            .await
            .unwrap();
        env.ctx.store.set_for_cloud_delete("d.txt").await.unwrap();

        Task::DeleteCloud {
            name: "d.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        assert!(!env.remote.contains("d.txt"));
        assert!(env.ctx.store.get("d.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cloud_of_missing_object_counts_as_done() {
        let env = test_env("task_delete_cloud_missing");
        let info = env.remote.insert_file("d.txt", b"bye", Utc::now());
        env.ctx
            .store
            .set_for_download("d.txt", info.clone().into())
            .await
            .unwrap();
        env.ctx.store.set_for_cloud_delete("d.txt").await.unwrap();
        env.remote.delete_file(&env.ctx.bucket, &info).await.unwrap();

        Task::DeleteCloud {
            name: "d.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        assert!(env.ctx.store.get("d.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cloud_failure_keeps_record_for_retry() {
        let env = test_env("task_delete_cloud_retry");
        let info = env.remote.insert_file("d.txt", b"bye", Utc::now());
        env.ctx
            .store
            .set_for_download("d.txt", info.into())
            .await
            .unwrap();
        env.ctx.store.set_for_cloud_delete("d.txt").await.unwrap();
        env.remote.fail_next_deletes(1);

        Task::DeleteCloud {
            name: "d.txt".into(),
        }
        .run(&env.ctx)
        .await
        .unwrap();

        let record = env.ctx.store.get("d.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::ForCloudDelete);
        assert!(env.remote.contains("d.txt"));
    }
}
