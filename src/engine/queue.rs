//! FIFO task queue with per-name exclusivity.
//!
//! A task key may appear at most once across the queued and running sets
//! combined. Duplicate submissions are dropped at `add` time, so a burst
//! of watcher events for one file collapses into a single pending task
//! and two workers can never act on the same name concurrently.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

use super::task::{Task, TaskKey};

#[derive(Default)]
struct QueueInner {
    queue: VecDeque<Task>,
    queued: HashSet<TaskKey>,
    running: HashSet<TaskKey>,
    closed: bool,
}

/// Shared work queue feeding the executor workers.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a task. Returns false if an equivalent task is already
    /// queued or running, or the queue has been closed.
    pub fn add(&self, task: Task) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            let key = task.key();
            if inner.queued.contains(&key) || inner.running.contains(&key) {
                tracing::debug!(key = ?key, "Task already pending, dropping duplicate");
                return false;
            }
            inner.queued.insert(key);
            inner.queue.push_back(task);
        }
        self.notify.notify_one();
        true
    }

    /// Take the next task, waiting until one is available. The task's key
    /// moves to the running set; the caller must pair this with
    /// [`complete`](Self::complete). Returns None once the queue is closed
    /// and drained.
    pub async fn take(&self) -> Option<Task> {
        loop {
            // Register for a wakeup before checking state, so a task added
            // between the check and the await is not missed.
            let notified = self.notify.notified();

            {
                let mut inner = self.lock();
                if let Some(task) = inner.queue.pop_front() {
                    let key = task.key();
                    inner.queued.remove(&key);
                    inner.running.insert(key);
                    let more = !inner.queue.is_empty();
                    drop(inner);
                    if more {
                        // Notify stores at most one permit; pass it on so
                        // sibling workers see the remaining tasks.
                        self.notify.notify_one();
                    }
                    return Some(task);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a taken task as finished, releasing its key for re-submission.
    pub fn complete(&self, key: &TaskKey) {
        self.lock().running.remove(key);
    }

    /// Stop accepting tasks and wake all waiting workers. Already-queued
    /// tasks are still handed out so the executor can drain them.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued (not yet running) tasks.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently held by workers.
    #[cfg(test)]
    pub fn running_len(&self) -> usize {
        self.lock().running.len()
    }
}
