//! Task manager — submit, query, await and clean up background tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::TaskManagerConfig;
use crate::error::TaskError;
use crate::worker::pool::{PoolStats, RecordTable, WorkerPool};
use crate::worker::queue::{QueuedTask, WorkQueue};
use crate::worker::record::TaskRecord;
use crate::worker::state::TaskStatus;
use crate::worker::task::TaskWork;

/// Owns the work queue, the record table and the worker pool lifecycle.
///
/// Construct one per process at the composition root and share it behind an
/// `Arc`; there is no global instance.
pub struct TaskManager {
    config: TaskManagerConfig,
    records: RecordTable,
    queue: WorkQueue,
    stats: PoolStats,
    accepting: AtomicBool,
    /// Held shared by `submit` and exclusively by `stop` while it closes
    /// admission, so no submission straddles the switch.
    admission: RwLock<()>,
    pool: Mutex<Option<WorkerPool>>,
    sequence: AtomicU64,
}

impl TaskManager {
    /// Create a stopped task manager.
    pub fn new(config: TaskManagerConfig) -> Self {
        Self {
            config,
            records: Arc::new(RwLock::new(HashMap::new())),
            queue: WorkQueue::new(),
            stats: PoolStats::default(),
            accepting: AtomicBool::new(false),
            admission: RwLock::new(()),
            pool: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    /// Spawn the worker loops. No-op if already running.
    pub async fn start(&self) {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return;
        }

        info!(workers = self.config.worker_count, "Starting task workers");
        *pool = Some(WorkerPool::spawn(
            self.config.worker_count,
            self.queue.clone(),
            Arc::clone(&self.records),
            self.stats.clone(),
            self.config.poll_timeout,
        ));
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Stop accepting work and wait up to `grace` for in-flight tasks.
    ///
    /// No-op if not running. If the grace period runs out the wait is
    /// abandoned: the stragglers keep executing in the background and their
    /// records stay RUNNING. Their IDs are returned in
    /// [`TaskError::GraceExceeded`]. Tasks still queued stay PENDING and run
    /// if the manager is started again.
    pub async fn stop(&self, grace: Duration) -> Result<(), TaskError> {
        let mut pool = self.pool.lock().await;
        let Some(running) = pool.take() else {
            return Ok(());
        };

        {
            let _closing = self.admission.write().await;
            self.accepting.store(false, Ordering::SeqCst);
        }
        info!(grace = ?grace, "Stopping task workers");

        if running.shutdown(grace).await {
            info!("Task workers stopped");
            return Ok(());
        }

        let stuck = self.ids_with_status(TaskStatus::Running).await;
        warn!(
            stuck = ?stuck,
            "Shutdown grace exceeded; abandoning in-flight tasks"
        );
        Err(TaskError::GraceExceeded { grace, stuck })
    }

    /// Stop with the configured grace period.
    pub async fn shutdown(&self) -> Result<(), TaskError> {
        self.stop(self.config.shutdown_grace).await
    }

    /// Whether submissions are currently accepted.
    pub fn is_running(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Queue `work` under `name` and return the new task ID immediately.
    pub async fn submit(&self, name: impl Into<String>, work: TaskWork) -> Result<String, TaskError> {
        let _admitted = self.admission.read().await;
        if !self.is_running() {
            return Err(TaskError::NotRunning);
        }

        let name = name.into();
        let id = self.next_id(&name);

        // The record goes in before the queue entry so a worker always finds it.
        self.records
            .write()
            .await
            .insert(id.clone(), TaskRecord::new(&id, &name));

        let task = QueuedTask {
            id: id.clone(),
            name: name.clone(),
            work,
        };
        if self.queue.push(task).is_err() {
            self.records.write().await.remove(&id);
            return Err(TaskError::NotRunning);
        }

        info!(task_id = %id, task = %name, "Submitted task");
        Ok(id)
    }

    /// Snapshot of a task record, if the ID is known.
    pub async fn get_status(&self, id: &str) -> Option<TaskRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Poll until the task reaches a terminal status or `timeout` elapses.
    ///
    /// A timeout too large to represent as a deadline waits indefinitely.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<TaskRecord, TaskError> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let record = self
                .get_status(id)
                .await
                .ok_or_else(|| TaskError::UnknownTask { id: id.to_string() })?;

            if record.status.is_terminal() {
                return Ok(record);
            }

            let mut pause = self.config.wait_poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(TaskError::Timeout {
                        id: id.to_string(),
                        timeout,
                    });
                }
                pause = pause.min(deadline - now);
            }
            tokio::time::sleep(pause).await;
        }
    }

    /// Mark a pending task as cancelled so no worker will run it.
    pub async fn cancel(&self, id: &str) -> Result<TaskRecord, TaskError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| TaskError::UnknownTask { id: id.to_string() })?;

        record.transition_to(TaskStatus::Cancelled)?;
        info!(task_id = %id, task = %record.name, "Cancelled task");
        Ok(record.clone())
    }

    /// Drop finished records older than `older_than`. Returns how many went.
    ///
    /// Removes records that finished at or before the cutoff, and failed
    /// records created at or before it. Pending and running records are never
    /// removed, however old: a stuck task should stay visible.
    pub async fn cleanup(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(cutoff));
        let removed = before - records.len();

        if removed > 0 {
            info!(count = removed, "Cleaned up old tasks");
        }
        removed
    }

    /// Snapshots of every record, oldest first.
    pub async fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Count of records per status.
    pub async fn summary(&self) -> TaskSummary {
        let records = self.records.read().await;

        let mut summary = TaskSummary::default();
        for record in records.values() {
            match record.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }

        summary.total = records.len();
        summary.queued = self.queue.len();
        summary
    }

    /// Worker pool counters.
    pub fn stats(&self) -> PoolStats {
        self.stats.clone()
    }

    async fn ids_with_status(&self, status: TaskStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn next_id(&self, name: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{name}_{}_{seq}", Utc::now().timestamp_millis())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(TaskManagerConfig::default())
    }
}

/// Summary of all task records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Tasks sitting in the queue (pending or cancelled, not yet dequeued).
    pub queued: usize,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn manager(workers: usize) -> TaskManager {
        TaskManager::new(TaskManagerConfig {
            worker_count: workers,
            poll_timeout: Duration::from_millis(50),
            wait_poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(1),
        })
    }

    fn echo(value: &'static str) -> TaskWork {
        TaskWork::new(move || async move { Ok(serde_json::json!(value)) })
    }

    fn sleeper(ms: u64) -> TaskWork {
        TaskWork::new(move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(serde_json::Value::Null)
        })
    }

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let manager = manager(1);
        let err = manager.submit("echo", echo("ok")).await.unwrap_err();
        assert!(matches!(err, TaskError::NotRunning));
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn submit_after_stop_is_rejected() {
        let manager = manager(1);
        manager.start().await;
        manager.stop(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            manager.submit("echo", echo("ok")).await,
            Err(TaskError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn echo_completes_with_result() {
        let manager = manager(2);
        manager.start().await;

        let id = manager.submit("echo", echo("ok")).await.unwrap();
        assert!(id.starts_with("echo_"));

        let record = manager.wait(&id, WAIT).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(serde_json::json!("ok")));
        assert!(record.error.is_none());
        assert!(record.created_at <= record.started_at.unwrap());
        assert!(record.started_at.unwrap() <= record.completed_at.unwrap());

        manager.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn failing_task_is_recorded_and_pool_survives() {
        let manager = manager(1);
        manager.start().await;

        let boom = manager
            .submit(
                "boom",
                TaskWork::new(|| async { Err(anyhow::anyhow!("disk full")) }),
            )
            .await
            .unwrap();
        let record = manager.wait(&boom, WAIT).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("disk full"));
        assert!(record.result.is_none());

        let after = manager.submit("echo", echo("still here")).await.unwrap();
        let record = manager.wait(&after, WAIT).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn error_context_chain_is_kept() {
        let manager = manager(1);
        manager.start().await;

        let id = manager
            .submit(
                "sync",
                TaskWork::new(|| async {
                    Err(anyhow::anyhow!("connection reset").context("fetching profile"))
                }),
            )
            .await
            .unwrap();
        let record = manager.wait(&id, WAIT).await.unwrap();
        assert_eq!(
            record.error.as_deref(),
            Some("fetching profile: connection reset")
        );
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let manager = manager(0);
        manager.start().await;

        let mut ids = HashSet::new();
        for _ in 0..200 {
            ids.insert(manager.submit("same", echo("x")).await.unwrap());
        }
        assert_eq!(ids.len(), 200);
    }

    #[tokio::test]
    async fn get_status_unknown_is_none() {
        let manager = manager(1);
        assert!(manager.get_status("nope").await.is_none());
    }

    #[tokio::test]
    async fn wait_unknown_id() {
        let manager = manager(1);
        let err = manager.wait("nope", Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, TaskError::UnknownTask { ref id } if id == "nope"));
    }

    #[tokio::test]
    async fn wait_times_out_close_to_deadline() {
        let manager = manager(0);
        manager.start().await;
        let id = manager.submit("never", echo("x")).await.unwrap();

        let started = Instant::now();
        let err = manager
            .wait(&id, Duration::from_millis(100))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, TaskError::Timeout { .. }));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn cancel_pending_task_skips_execution() {
        let manager = manager(0);
        manager.start().await;

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let id = manager
            .submit(
                "notify",
                TaskWork::new(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::Value::Null)
                }),
            )
            .await
            .unwrap();

        let record = manager.cancel(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.completed_at.is_some());

        // A cancelled record is terminal, so wait returns straight away.
        let record = manager.wait(&id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);

        // Bring up a pool that actually drains the queue.
        manager.stop(Duration::from_secs(1)).await.unwrap();
        let drained = TaskManager {
            config: TaskManagerConfig {
                worker_count: 1,
                ..manager.config.clone()
            },
            ..manager
        };
        drained.start().await;
        for _ in 0..50 {
            if drained.stats().skipped() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(drained.stats().skipped(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_rejects_finished_and_unknown() {
        let manager = manager(1);
        manager.start().await;
        let id = manager.submit("echo", echo("ok")).await.unwrap();
        manager.wait(&id, WAIT).await.unwrap();

        assert!(matches!(
            manager.cancel(&id).await,
            Err(TaskError::InvalidTransition { .. })
        ));
        assert!(matches!(
            manager.cancel("ghost").await,
            Err(TaskError::UnknownTask { .. })
        ));
    }

    #[tokio::test]
    async fn cleanup_zero_keeps_active_records() {
        let manager = manager(1);
        manager.start().await;

        let done = manager.submit("echo", echo("ok")).await.unwrap();
        let failed = manager
            .submit("boom", TaskWork::new(|| async { Err(anyhow::anyhow!("no")) }))
            .await
            .unwrap();
        manager.wait(&done, WAIT).await.unwrap();
        manager.wait(&failed, WAIT).await.unwrap();

        let running = manager.submit("slow", sleeper(300)).await.unwrap();
        let pending = manager.submit("queued", echo("later")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(manager.cleanup(Duration::ZERO).await, 2);
        assert!(manager.get_status(&done).await.is_none());
        assert!(manager.get_status(&failed).await.is_none());
        assert_eq!(
            manager.get_status(&running).await.unwrap().status,
            TaskStatus::Running
        );
        assert_eq!(
            manager.get_status(&pending).await.unwrap().status,
            TaskStatus::Pending
        );

        // Cleaned up IDs are unknown from now on.
        assert!(matches!(
            manager.wait(&done, Duration::from_millis(10)).await,
            Err(TaskError::UnknownTask { .. })
        ));
    }

    #[tokio::test]
    async fn cleanup_respects_age() {
        let manager = manager(1);
        manager.start().await;
        let id = manager.submit("echo", echo("ok")).await.unwrap();
        manager.wait(&id, WAIT).await.unwrap();

        assert_eq!(manager.cleanup(Duration::from_secs(3600)).await, 0);
        assert!(manager.get_status(&id).await.is_some());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let manager = manager(2);
        manager.start().await;
        manager.start().await;
        assert!(manager.is_running());

        manager.stop(Duration::from_secs(1)).await.unwrap();
        manager.stop(Duration::from_secs(1)).await.unwrap();
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn restart_drains_leftover_queue() {
        let manager = manager(0);
        manager.start().await;
        let id = manager.submit("echo", echo("ok")).await.unwrap();
        manager.stop(Duration::from_secs(1)).await.unwrap();

        let manager = TaskManager {
            config: TaskManagerConfig {
                worker_count: 1,
                ..manager.config.clone()
            },
            ..manager
        };
        manager.start().await;
        let record = manager.wait(&id, WAIT).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn stop_reports_stuck_tasks() {
        let manager = manager(1);
        manager.start().await;
        let id = manager.submit("slow", sleeper(1000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = manager.stop(Duration::from_millis(50)).await.unwrap_err();
        match err {
            TaskError::GraceExceeded { stuck, .. } => assert_eq!(stuck, vec![id.clone()]),
            other => panic!("expected GraceExceeded, got {other:?}"),
        }
        assert_eq!(
            manager.get_status(&id).await.unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn summary_counts_statuses() {
        let manager = manager(1);
        manager.start().await;
        let ok = manager.submit("echo", echo("ok")).await.unwrap();
        manager.wait(&ok, WAIT).await.unwrap();
        let bad = manager
            .submit("boom", TaskWork::new(|| async { Err(anyhow::anyhow!("no")) }))
            .await
            .unwrap();
        manager.wait(&bad, WAIT).await.unwrap();

        let summary = manager.summary().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.queued, 0);

        let names: Vec<String> = manager.list().await.into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["echo", "boom"]);
    }

    #[tokio::test]
    async fn wait_without_representable_deadline() {
        let manager = manager(1);
        manager.start().await;
        let id = manager.submit("echo", echo("ok")).await.unwrap();

        let record = manager.wait(&id, Duration::MAX).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(serde_json::json!("ok")));
    }

    #[tokio::test]
    async fn blocking_work_does_not_stall_other_workers() {
        let manager = manager(2);
        manager.start().await;

        let started = Instant::now();
        let slow = manager
            .submit(
                "report",
                TaskWork::blocking(|| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(serde_json::json!("done"))
                }),
            )
            .await
            .unwrap();
        let quick = manager.submit("echo", echo("ok")).await.unwrap();

        let record = manager.wait(&quick, WAIT).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(200), "echo took {elapsed:?}");
        assert_eq!(
            manager.get_status(&slow).await.unwrap().status,
            TaskStatus::Running
        );

        let record = manager.wait(&slow, WAIT).await.unwrap();
        assert_eq!(record.result, Some(serde_json::json!("done")));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submissions_racing_stop_are_all_accounted_for() {
        let manager = Arc::new(manager(1));
        manager.start().await;

        let submitter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let mut accepted = Vec::new();
                loop {
                    match manager.submit("race", echo("x")).await {
                        Ok(id) => accepted.push(id),
                        Err(TaskError::NotRunning) => break,
                        Err(other) => panic!("unexpected submit error: {other}"),
                    }
                    tokio::task::yield_now().await;
                }
                accepted
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.stop(Duration::from_secs(1)).await.unwrap();
        let accepted = submitter.await.unwrap();
        assert!(!accepted.is_empty());

        // Closed means closed: nothing gets in once stop has returned.
        assert!(matches!(
            manager.submit("late", echo("x")).await,
            Err(TaskError::NotRunning)
        ));

        // Every accepted submission has a record, and none is left behind
        // once the manager runs again.
        assert_eq!(manager.list().await.len(), accepted.len());
        manager.start().await;
        for id in &accepted {
            let record = manager.wait(id, WAIT).await.unwrap();
            assert_eq!(record.status, TaskStatus::Completed);
        }
        manager.stop(Duration::from_secs(1)).await.unwrap();
    }
}
