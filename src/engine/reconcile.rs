//! Reconciliation: derive pending work from local dir, remote listing,
//! and stored state.
//!
//! The pass is idempotent. It only writes transitions and enqueues tasks
//! where the three views disagree, so running it twice in a row with no
//! intervening changes enqueues nothing the second time. All transitions
//! are durable before any task is enqueued; a crash between the two at
//! worst re-derives the same tasks on the next pass.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::remote::{digest_hex, FileInfo};
use crate::store::{CloudData, LocalData, StoreError, SyncRecord, SyncState};
use crate::types::ConflictPolicy;

use super::{SyncContext, Task, PART_SUFFIX};

/// Which side a conflict resolution keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Apply the configured policy to divergent edits.
///
/// `PreferNewer` breaks ties in favor of the local copy, so a tie never
/// costs a download of bytes already on disk.
pub fn resolve_conflict(
    policy: ConflictPolicy,
    local: &LocalData,
    cloud: &CloudData,
) -> ConflictWinner {
    match policy {
        ConflictPolicy::PreferLocal => ConflictWinner::Local,
        ConflictPolicy::PreferRemote => ConflictWinner::Remote,
        ConflictPolicy::PreferNewer => {
            if local.modified_at >= cloud.modified_at {
                ConflictWinner::Local
            } else {
                ConflictWinner::Remote
            }
        }
    }
}

/// One full reconciliation pass.
///
/// Listing failures on either side are not fatal; the pass is skipped and
/// the next interval retries.
pub(crate) async fn run_check_state(ctx: &SyncContext) -> Result<(), StoreError> {
    let cloud_files = match ctx.remote.list_files(&ctx.bucket).await {
        Ok(listing) => {
            let mut map = HashMap::new();
            for info in listing {
                if !is_plain_file_name(&info.name) {
                    tracing::warn!(name = %info.name, "Ignoring remote object whose name is not a plain file name");
                    continue;
                }
                map.insert(info.name.clone(), info);
            }
            map
        }
        Err(e) => {
            tracing::warn!(error = %e, transient = e.is_transient(), "Cannot list remote files, skipping reconciliation pass");
            return Ok(());
        }
    };

    let local_files = match list_local_files(&ctx.sync_dir).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(error = %e, dir = %ctx.sync_dir.display(), "Cannot list sync directory, skipping reconciliation pass");
            return Ok(());
        }
    };

    let records: HashMap<String, SyncRecord> = ctx
        .store
        .list_all()
        .await?
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect();

    let mut names: BTreeSet<&str> = BTreeSet::new();
    names.extend(local_files.keys().map(String::as_str));
    names.extend(cloud_files.keys().map(String::as_str));
    names.extend(records.keys().map(String::as_str));

    let mut tasks: Vec<Task> = Vec::new();
    for name in names {
        let record = records.get(name);
        let local = local_files.get(name).copied();
        let cloud = cloud_files.get(name);
        check_name(ctx, name, record, local, cloud, &mut tasks).await?;
    }

    ctx.store.commit().await?;

    let mut enqueued = 0usize;
    let total = tasks.len();
    for task in tasks {
        if ctx.queue.add(task) {
            enqueued += 1;
        }
    }
    if total > 0 {
        tracing::info!(derived = total, enqueued, "Reconciliation pass derived tasks");
    } else {
        tracing::debug!("Reconciliation pass found nothing to do");
    }

    Ok(())
}

/// Decide the next transition and task for one name.
async fn check_name(
    ctx: &SyncContext,
    name: &str,
    record: Option<&SyncRecord>,
    local: Option<LocalData>,
    cloud: Option<&FileInfo>,
    tasks: &mut Vec<Task>,
) -> Result<(), StoreError> {
    let Some(record) = record else {
        match (local, cloud) {
            (Some(local), None) => {
                ctx.store.set_for_upload(name, local).await?;
                tasks.push(Task::Upload { name: name.into() });
            }
            (None, Some(info)) => {
                ctx.store.set_for_download(name, info.clone().into()).await?;
                tasks.push(Task::Download { name: name.into() });
            }
            (Some(local), Some(info)) => {
                adopt_untracked(ctx, name, local, info, tasks).await?;
            }
            (None, None) => {}
        }
        return Ok(());
    };

    match record.state {
        SyncState::Synced => match (local, cloud) {
            (Some(local), Some(info)) => {
                let local_changed = record.local != Some(local);
                let remote_changed = record
                    .cloud
                    .as_ref()
                    .map(|c| c.id != info.id || c.digest != info.digest)
                    .unwrap_or(true);
                match (local_changed, remote_changed) {
                    (false, false) => {}
                    (true, false) => {
                        tracing::debug!(name = %name, "Local copy changed since sync");
                        ctx.store.set_for_upload(name, local).await?;
                        tasks.push(Task::Upload { name: name.into() });
                    }
                    (false, true) => {
                        tracing::debug!(name = %name, "Remote copy changed since sync");
                        ctx.store.set_for_download(name, info.clone().into()).await?;
                        tasks.push(Task::Download { name: name.into() });
                    }
                    (true, true) => {
                        tracing::info!(name = %name, "Both copies changed since sync");
                        ctx.store
                            .set_conflict(name, local, info.clone().into())
                            .await?;
                        route_conflict(ctx, name, local, info, tasks).await?;
                    }
                }
            }
            (Some(_), None) => {
                tracing::debug!(name = %name, "Remote copy deleted, removing local copy");
                ctx.store.set_for_local_delete(name).await?;
                tasks.push(Task::DeleteLocal { name: name.into() });
            }
            (None, Some(_)) => {
                tracing::debug!(name = %name, "Local copy deleted, removing remote copy");
                ctx.store.set_for_cloud_delete(name).await?;
                tasks.push(Task::DeleteCloud { name: name.into() });
            }
            (None, None) => {
                ctx.store.remove(name).await?;
            }
        },

        SyncState::New | SyncState::ForUpload | SyncState::UploadFailed | SyncState::Modified => {
            if let Some(local) = local {
                if let Some(info) = cloud {
                    // The upload may have completed without the record
                    // update surviving a crash; matching content needs no
                    // second transfer.
                    if content_matches(ctx, name, local, info).await {
                        tracing::debug!(name = %name, "Remote copy already matches, marking synced");
                        ctx.store
                            .set_synced(name, local, info.clone().into())
                            .await?;
                        return Ok(());
                    }
                }
                ctx.store.set_for_upload(name, local).await?;
                tasks.push(Task::Upload { name: name.into() });
            } else if let Some(info) = cloud {
                // Local intent vanished; converge to the remote copy.
                ctx.store.set_for_download(name, info.clone().into()).await?;
                tasks.push(Task::Download { name: name.into() });
            } else {
                ctx.store.remove(name).await?;
            }
        }

        SyncState::ForDownload | SyncState::DownloadFailed => {
            if let Some(info) = cloud {
                if let Some(local) = local {
                    // Same crash window as the upload side, after the part
                    // file rename but before the record update.
                    if content_matches(ctx, name, local, info).await {
                        tracing::debug!(name = %name, "Local copy already matches, marking synced");
                        ctx.store
                            .set_synced(name, local, info.clone().into())
                            .await?;
                        return Ok(());
                    }
                }
                ctx.store.set_for_download(name, info.clone().into()).await?;
                tasks.push(Task::Download { name: name.into() });
            } else if let Some(local) = local {
                ctx.store.set_for_upload(name, local).await?;
                tasks.push(Task::Upload { name: name.into() });
            } else {
                ctx.store.remove(name).await?;
            }
        }

        SyncState::ForLocalDelete => {
            if let Some(info) = cloud {
                // Remote copy reappeared; it supersedes the pending delete.
                ctx.store.set_for_download(name, info.clone().into()).await?;
                tasks.push(Task::Download { name: name.into() });
            } else if local.is_some() {
                tasks.push(Task::DeleteLocal { name: name.into() });
            } else {
                ctx.store.remove(name).await?;
            }
        }

        SyncState::ForCloudDelete => {
            if cloud.is_some() {
                tasks.push(Task::DeleteCloud { name: name.into() });
            } else if let Some(local) = local {
                // Local copy reappeared; it supersedes the pending delete.
                ctx.store.set_for_upload(name, local).await?;
                tasks.push(Task::Upload { name: name.into() });
            } else {
                ctx.store.remove(name).await?;
            }
        }

        SyncState::Conflict => match (local, cloud) {
            (Some(local), Some(info)) => {
                route_conflict(ctx, name, local, info, tasks).await?;
            }
            (Some(local), None) => {
                ctx.store.set_for_upload(name, local).await?;
                tasks.push(Task::Upload { name: name.into() });
            }
            (None, Some(info)) => {
                ctx.store.set_for_download(name, info.clone().into()).await?;
                tasks.push(Task::Download { name: name.into() });
            }
            (None, None) => {
                ctx.store.remove(name).await?;
            }
        },
    }

    Ok(())
}

/// A name present on both sides with no record: typically a fresh database
/// in front of an already-synced directory. Matching content is adopted as
/// `Synced` without any transfer; divergent content goes through conflict
/// resolution.
async fn adopt_untracked(
    ctx: &SyncContext,
    name: &str,
    local: LocalData,
    info: &FileInfo,
    tasks: &mut Vec<Task>,
) -> Result<(), StoreError> {
    if content_matches(ctx, name, local, info).await {
        tracing::debug!(name = %name, "Adopting matching untracked file as synced");
        ctx.store
            .set_synced(name, local, info.clone().into())
            .await?;
        return Ok(());
    }
    tracing::info!(name = %name, "Untracked file differs from remote copy");
    ctx.store
        .set_conflict(name, local, info.clone().into())
        .await?;
    route_conflict(ctx, name, local, info, tasks).await
}

/// True when the local file's bytes match the remote object's digest.
/// A read failure counts as a mismatch and lets a transfer sort it out.
async fn content_matches(
    ctx: &SyncContext,
    name: &str,
    local: LocalData,
    info: &FileInfo,
) -> bool {
    if local.size != info.size {
        return false;
    }
    match tokio::fs::read(ctx.sync_dir.join(name)).await {
        Ok(data) => digest_hex(&data) == info.digest,
        Err(e) => {
            tracing::warn!(name = %name, error = %e, "Cannot read local file for comparison");
            false
        }
    }
}

/// Apply the conflict policy and record the winning direction.
async fn route_conflict(
    ctx: &SyncContext,
    name: &str,
    local: LocalData,
    info: &FileInfo,
    tasks: &mut Vec<Task>,
) -> Result<(), StoreError> {
    let cloud: CloudData = info.clone().into();
    match resolve_conflict(ctx.conflict_policy, &local, &cloud) {
        ConflictWinner::Local => {
            tracing::info!(name = %name, policy = ?ctx.conflict_policy, "Conflict resolved in favor of local copy");
            ctx.store.set_for_upload(name, local).await?;
            tasks.push(Task::Upload { name: name.into() });
        }
        ConflictWinner::Remote => {
            tracing::info!(name = %name, policy = ?ctx.conflict_policy, "Conflict resolved in favor of remote copy");
            ctx.store.set_for_download(name, cloud).await?;
            tasks.push(Task::Download { name: name.into() });
        }
    }
    Ok(())
}

/// A name that stays inside the sync directory when joined to it.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// List regular files in the sync directory, keyed by name.
///
/// Subdirectories, partial download files, and names that are not valid
/// UTF-8 are skipped.
async fn list_local_files(dir: &Path) -> std::io::Result<BTreeMap<String, LocalData>> {
    let mut files = BTreeMap::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(name = ?entry.file_name(), "Skipping file with non-UTF-8 name");
            continue;
        };
        if name.ends_with(PART_SUFFIX) {
            continue;
        }
        match LocalData::read(&entry.path()) {
            Ok(local) => {
                files.insert(name, local);
            }
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "Cannot stat local file, skipping");
            }
        }
    }
    Ok(files)
}
