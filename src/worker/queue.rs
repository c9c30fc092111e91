//! Work queue — unbounded FIFO hand-off between submitters and workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::worker::task::TaskWork;

/// A task waiting for a worker. Enqueued exactly once, dequeued by exactly
/// one worker.
#[derive(Debug)]
pub(crate) struct QueuedTask {
    pub id: String,
    pub name: String,
    pub work: TaskWork,
}

/// Multi-producer, multi-consumer FIFO queue.
///
/// The receiver sits behind a fair mutex, so workers take turns and items
/// leave in the order they arrived.
#[derive(Clone)]
pub(crate) struct WorkQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
    depth: Arc<AtomicUsize>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue without waiting. Hands the task back if the queue is closed.
    pub fn push(&self, task: QueuedTask) -> Result<(), QueuedTask> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.tx.send(task).map_err(|e| {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            e.0
        })
    }

    /// Wait up to `timeout` for the next task.
    pub async fn pop(&self, timeout: Duration) -> Option<QueuedTask> {
        let next = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await
        .ok()
        .flatten();

        if next.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        next
    }

    /// Number of tasks waiting.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}
