//! Worker pool — fixed set of worker loops draining the work queue.
//!
//! Each worker is a fault barrier: whatever the work does (error, panic),
//! the outcome lands on the task record and the worker goes back to the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::worker::queue::{QueuedTask, WorkQueue};
use crate::worker::record::TaskRecord;
use crate::worker::state::TaskStatus;
use crate::worker::task::describe_join_error;

/// Shared record table, keyed by task ID.
pub(crate) type RecordTable = Arc<RwLock<HashMap<String, TaskRecord>>>;

/// Counters for the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    processed: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
}

impl PoolStats {
    /// Tasks executed to a terminal status.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Tasks dequeued but not executed (cancelled before pickup).
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Tasks executing right now.
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// Handle on a running set of workers.
pub(crate) struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` worker loops.
    pub fn spawn(
        worker_count: usize,
        queue: WorkQueue,
        records: RecordTable,
        stats: PoolStats,
        poll_timeout: Duration,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);

        if worker_count == 0 {
            warn!("Task manager started with zero workers; queued tasks will not run");
        }

        let handles = (0..worker_count)
            .map(|i| {
                let worker = Worker {
                    name: format!("worker-{i}"),
                    queue: queue.clone(),
                    records: Arc::clone(&records),
                    stats: stats.clone(),
                    poll_timeout,
                };
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect();

        Self { shutdown, handles }
    }

    /// Signal every worker to stop and wait up to `grace` for in-flight work.
    ///
    /// Returns `false` if the grace period ran out. Workers still busy are
    /// left to finish on their own; nothing is aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        // No receivers left only means every worker already exited.
        let _ = self.shutdown.send(true);
        let all = futures::future::join_all(self.handles);
        tokio::time::timeout(grace, all).await.is_ok()
    }
}

struct Worker {
    name: String,
    queue: WorkQueue,
    records: RecordTable,
    stats: PoolStats,
    poll_timeout: Duration,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = %self.name, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = self.queue.pop(self.poll_timeout) => next,
            };

            if let Some(task) = next {
                self.execute(task).await;
            }
        }

        debug!(worker = %self.name, "Worker stopped");
    }

    async fn execute(&self, task: QueuedTask) {
        let QueuedTask { id, name, work } = task;

        if !self.claim(&id).await {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        info!(worker = %self.name, task_id = %id, task = %name, "Executing task");
        self.stats.active.fetch_add(1, Ordering::Relaxed);

        // Own tokio task so a panic in the work is caught at the join.
        let outcome = match tokio::spawn(async move { work.into_future().await }).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(e) => Err(describe_join_error(e)),
        };

        self.stats.active.fetch_sub(1, Ordering::Relaxed);
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            warn!(task_id = %id, "Task record disappeared while running");
            return;
        };

        match outcome {
            Ok(value) => {
                if let Err(e) = record.complete(value) {
                    warn!(task_id = %id, error = %e, "Could not record task completion");
                    return;
                }
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(task_id = %id, task = %name, elapsed = ?record.elapsed(), "Task completed");
            }
            Err(message) => {
                error!(task_id = %id, task = %name, error = %message, "Task failed");
                if let Err(e) = record.fail(message) {
                    warn!(task_id = %id, error = %e, "Could not record task failure");
                    return;
                }
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Move the record to RUNNING. Returns `false` if it must not run.
    async fn claim(&self, id: &str) -> bool {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(id) else {
            warn!(task_id = %id, "Dequeued task has no record, skipping");
            return false;
        };

        if record.status == TaskStatus::Cancelled {
            debug!(task_id = %id, "Skipping cancelled task");
            return false;
        }

        match record.transition_to(TaskStatus::Running) {
            Ok(()) => true,
            Err(e) => {
                warn!(task_id = %id, error = %e, "Cannot start task");
                false
            }
        }
    }
}
