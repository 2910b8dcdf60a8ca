//! Worker loops draining the task queue.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::StoreError;

use super::SyncContext;

/// Spawn `count` workers draining the shared queue.
///
/// Workers run until the queue is closed and drained; shutdown is driven
/// by closing the queue, so tasks already accepted still complete. A
/// state store failure is fatal: the worker cancels the token so the
/// whole engine winds down rather than syncing blind.
pub(crate) fn spawn_workers(
    ctx: Arc<SyncContext>,
    count: usize,
    token: CancellationToken,
) -> Vec<JoinHandle<Result<(), StoreError>>> {
    (0..count)
        .map(|id| {
            let ctx = ctx.clone();
            let token = token.clone();
            tokio::spawn(async move { worker_loop(id, ctx, token).await })
        })
        .collect()
}

async fn worker_loop(
    id: usize,
    ctx: Arc<SyncContext>,
    token: CancellationToken,
) -> Result<(), StoreError> {
    tracing::debug!(worker = id, "Worker started");
    loop {
        let Some(task) = ctx.queue.take().await else {
            tracing::debug!(worker = id, "Queue closed, worker exiting");
            return Ok(());
        };

        let key = task.key();
        tracing::debug!(worker = id, key = ?key, "Running task");
        let result = task.run(&ctx).await;
        ctx.queue.complete(&key);

        if let Err(e) = result {
            tracing::error!(worker = id, error = %e, "State store failure, shutting down");
            token.cancel();
            return Err(e);
        }
    }
}
