//! The sync engine: queue, workers, and the reconciliation loop.

pub mod executor;
pub mod queue;
pub mod reconcile;
pub mod task;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::remote::{Bucket, RemoteError, RemoteStore};
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};
use crate::store::SyncStore;
use crate::types::ConflictPolicy;

pub use queue::TaskQueue;
pub use task::Task;

/// Suffix for in-progress download files. Renamed away on completion and
/// ignored by reconciliation and the watcher.
pub(crate) const PART_SUFFIX: &str = ".bspart";

/// How long shutdown waits for workers to drain already-queued tasks.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared dependencies for tasks, reconciliation, and the watcher.
pub struct SyncContext {
    pub store: Arc<dyn SyncStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub queue: Arc<TaskQueue>,
    pub bucket: Bucket,
    pub sync_dir: PathBuf,
    pub conflict_policy: ConflictPolicy,
    /// Bounds the probe and cleanup steps inside tasks. Tasks themselves
    /// are never retried in-process; the reconciliation loop drives that.
    pub probe_retry: RetryConfig,
}

pub(crate) fn classify_remote(e: &RemoteError) -> RetryAction {
    if e.is_transient() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

/// Find the sync bucket, creating it on first run.
///
/// Transient failures are retried with backoff since nothing works
/// without a bucket.
pub async fn ensure_bucket(
    remote: &dyn RemoteStore,
    name: &str,
    retry: &RetryConfig,
) -> Result<Bucket, RemoteError> {
    retry_with_backoff(retry, classify_remote, || async {
        let buckets = remote.get_buckets().await?;
        if let Some(bucket) = buckets.into_iter().find(|b| b.name == name) {
            return Ok(bucket);
        }
        tracing::info!(bucket = %name, "Bucket not found, creating");
        remote.create_bucket(name).await
    })
    .await
}

/// Run the engine until the token is cancelled.
///
/// Drives periodic reconciliation, the filesystem watcher, and `workers`
/// queue drainers. On cancellation the queue is closed and workers get
/// a bounded window to finish what is already queued.
pub async fn run(
    ctx: Arc<SyncContext>,
    workers: usize,
    reconcile_interval: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(
        dir = %ctx.sync_dir.display(),
        bucket = %ctx.bucket.name,
        workers,
        interval_secs = reconcile_interval.as_secs(),
        "Starting sync engine"
    );

    let worker_handles = executor::spawn_workers(ctx.clone(), workers.max(1), token.clone());
    let watcher =
        crate::watcher::spawn(ctx.clone(), token.clone()).context("failed to start file watcher")?;

    // Initial pass picks up whatever happened while we were not running.
    ctx.queue.add(Task::CheckState);

    let mut interval = tokio::time::interval(reconcile_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = interval.tick() => {
                ctx.queue.add(Task::CheckState);
            }
            _ = token.cancelled() => break,
        }
    }

    tracing::info!("Draining sync queue before exit");
    ctx.queue.close();

    let mut result = Ok(());
    match tokio::time::timeout(DRAIN_TIMEOUT, join_all(worker_handles)).await {
        Ok(outcomes) => {
            for outcome in outcomes {
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if result.is_ok() {
                            result = Err(anyhow::Error::new(e).context("worker failed"));
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Worker panicked");
                        if result.is_ok() {
                            result = Err(anyhow::Error::new(e).context("worker panicked"));
                        }
                    }
                }
            }
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "Workers did not drain in time, abandoning remaining tasks"
            );
        }
    }

    drop(watcher);
    tracing::info!("Sync engine stopped");
    result
}


#[cfg(test)]
mod tests {
    use super::*;
    use testutil::test_env;

    #[tokio::test]
    async fn ensure_bucket_creates_once() {
        let env = test_env("ensure_bucket_creates");
        let retry = RetryConfig {
            max_retries: 0,
            base_delay_secs: 0,
            max_delay_secs: 0,
        };

        let bucket = ensure_bucket(env.remote.as_ref(), "bucketsync", &retry)
            .await
            .unwrap();
        assert_eq!(bucket.name, "bucketsync");

        // Second call finds the existing bucket instead of creating another
        let again = ensure_bucket(env.remote.as_ref(), "bucketsync", &retry)
            .await
            .unwrap();
        assert_eq!(again, bucket);
        assert_eq!(env.remote.get_buckets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_performs_initial_pass_and_stops_on_cancel() {
        let env = test_env("run_initial_pass");
        std::fs::write(env.dir.join("a.txt"), b"hello").unwrap();

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });

        run(env.ctx.clone(), 2, Duration::from_secs(3600), token)
            .await
            .unwrap();

        assert_eq!(env.remote.file_data("a.txt"), Some(b"hello".to_vec()));
        let record = env.ctx.store.get("a.txt").await.unwrap().unwrap();
        assert_eq!(record.state, crate::store::SyncState::Synced);
    }
}
