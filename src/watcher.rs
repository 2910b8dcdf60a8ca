//! Filesystem watcher feeding the sync queue.
//!
//! Local changes are noticed twice: immediately here, and eventually by
//! the periodic reconciliation pass. The watcher only accelerates the
//! common cases (create, modify, delete of a direct child); anything it
//! misses is caught by the next pass, so event loss is not fatal.

use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{SyncContext, Task, PART_SUFFIX};
use crate::store::{LocalData, StoreError};

/// Keeps the platform watcher and its forwarding task alive.
pub struct WatcherHandle {
    _watcher: notify::RecommendedWatcher,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Watch the sync directory (non-recursive) and translate events into
/// store transitions and queued tasks.
pub fn spawn(ctx: Arc<SyncContext>, token: CancellationToken) -> Result<WatcherHandle, notify::Error> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    // The notify callback runs on the watcher's own thread; forward into
    // the async world over an unbounded channel.
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "File watcher error"),
        }
    })?;
    watcher.watch(&ctx.sync_dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(dir = %ctx.sync_dir.display(), "File watcher started");

    let handle = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = token.cancelled() => break,
            };
            let Some(event) = event else { break };

            if matches!(event.kind, EventKind::Access(_)) {
                continue;
            }
            for path in &event.paths {
                if let Err(e) = process_path(&ctx, path).await {
                    tracing::error!(error = %e, "State store failure in watcher, shutting down");
                    token.cancel();
                    return;
                }
            }
        }
        tracing::debug!("File watcher stopped");
    });

    Ok(WatcherHandle {
        _watcher: watcher,
        handle,
    })
}

/// React to a change under one path.
///
/// The event kind is deliberately ignored; the path's current state on
/// disk decides, which makes stale and coalesced events harmless.
async fn process_path(ctx: &SyncContext, path: &Path) -> Result<(), StoreError> {
    if path.parent() != Some(ctx.sync_dir.as_path()) {
        return Ok(());
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };
    if name.ends_with(PART_SUFFIX) {
        return Ok(());
    }

    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {
            let local = match LocalData::read(path) {
                Ok(local) => local,
                Err(e) => {
                    // Raced with a delete or rename; the next event or
                    // reconcile pass settles it.
                    tracing::debug!(name = %name, error = %e, "File vanished while handling event");
                    return Ok(());
                }
            };
            tracing::debug!(name = %name, "Local file created or modified");
            ctx.store.set_for_upload(name, local).await?;
            ctx.store.commit().await?;
            ctx.queue.add(Task::Upload { name: name.into() });
        }
        Ok(_) => {} // directory or other non-file
        Err(_) => {
            let Some(record) = ctx.store.get(name).await? else {
                return Ok(());
            };
            if record.cloud.is_some() {
                tracing::debug!(name = %name, "Local file deleted");
                ctx.store.set_for_cloud_delete(name).await?;
                ctx.store.commit().await?;
                ctx.queue.add(Task::DeleteCloud { name: name.into() });
            } else {
                // Never made it to the remote store; just forget it.
                ctx.store.remove(name).await?;
                ctx.store.commit().await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::test_env;
    use crate::store::SyncState;
    use std::fs;

    #[tokio::test]
    async fn created_file_is_marked_for_upload() {
        let env = test_env("watch_created");
        let path = env.dir.join("a.txt");
        fs::write(&path, b"hello").unwrap();

        process_path(&env.ctx, &path).await.unwrap();

        let record = env.ctx.store.get("a.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::ForUpload);
        assert_eq!(env.ctx.queue.len(), 1);
    }

    #[tokio::test]
    async fn deleted_synced_file_is_marked_for_cloud_delete() {
        let env = test_env("watch_deleted");
        let path = env.dir.join("a.txt");
        fs::write(&path, b"hello").unwrap();
        process_path(&env.ctx, &path).await.unwrap();
        // Simulate the completed upload
        let local = env
            .ctx
            .store
            .get("a.txt")
            .await
            .unwrap()
            .unwrap()
            .local
            .unwrap();
        let info = env.remote.insert_file("a.txt", b"hello", chrono::Utc::now());
        env.ctx
            .store
            .set_synced("a.txt", local, info.into())
            .await
            .unwrap();

        fs::remove_file(&path).unwrap();
        process_path(&env.ctx, &path).await.unwrap();

        let record = env.ctx.store.get("a.txt").await.unwrap().unwrap();
        assert_eq!(record.state, SyncState::ForCloudDelete);
        // Both observations stay with the pending delete
        assert!(record.local.is_some());
        assert!(record.cloud.is_some());
    }

    #[tokio::test]
    async fn deleted_unuploaded_file_is_forgotten() {
        let env = test_env("watch_deleted_unuploaded");
        let path = env.dir.join("a.txt");
        fs::write(&path, b"hello").unwrap();
        process_path(&env.ctx, &path).await.unwrap();

        fs::remove_file(&path).unwrap();
        process_path(&env.ctx, &path).await.unwrap();

        assert!(env.ctx.store.get("a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_download_files_are_ignored() {
        let env = test_env("watch_part_ignored");
        let path = env.dir.join("a.txt.bspart");
        fs::write(&path, b"half").unwrap();

        process_path(&env.ctx, &path).await.unwrap();

        assert!(env.ctx.queue.is_empty());
        assert!(env.ctx.store.get("a.txt.bspart").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn paths_outside_the_sync_dir_are_ignored() {
        let env = test_env("watch_outside");
        let outside = std::env::temp_dir().join("bucketsync_watch_outside.txt");
        fs::write(&outside, b"x").unwrap();

        process_path(&env.ctx, &outside).await.unwrap();
        assert!(env.ctx.queue.is_empty());

        let _ = fs::remove_file(&outside);
    }

    #[tokio::test]
    async fn subdirectories_are_ignored() {
        let env = test_env("watch_subdir");
        let sub = env.dir.join("nested");
        fs::create_dir(&sub).unwrap();

        process_path(&env.ctx, &sub).await.unwrap();
        assert!(env.ctx.queue.is_empty());
        assert!(env.ctx.store.get("nested").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn spawned_watcher_picks_up_new_files() {
        let env = test_env("watch_spawned");
        let token = CancellationToken::new();
        let _handle = spawn(env.ctx.clone(), token.clone()).unwrap();

        fs::write(env.dir.join("live.txt"), b"event").unwrap();

        // Platform watchers deliver asynchronously; poll with a deadline
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if env
                .ctx
                .store
                .get("live.txt")
                .await
                .unwrap()
                .map(|r| r.state == SyncState::ForUpload)
                .unwrap_or(false)
            {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "watcher never reported the new file"
            );
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        token.cancel();
    }
}
