//! Housekeeping jobs: expired sessions and finished task records.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::store::Database;
use crate::worker::{TaskManager, TaskResult, TaskWork};

/// Purge expired sessions. Completes with `{"cleaned": n}`.
pub fn cleanup_expired_sessions(store: Arc<dyn Database>) -> TaskWork {
    TaskWork::new(move || purge_sessions(store))
}

async fn purge_sessions(store: Arc<dyn Database>) -> TaskResult {
    let cleaned = store.purge_expired_sessions(Utc::now()).await?;
    info!(count = cleaned, "Cleaned up expired sessions");
    Ok(json!({ "cleaned": cleaned }))
}

/// Drop task records finished more than `older_than` ago. Completes with
/// `{"removed": n}`.
///
/// Holds the manager weakly: the work itself sits in that manager's queue.
pub fn cleanup_old_tasks(manager: Weak<TaskManager>, older_than: Duration) -> TaskWork {
    TaskWork::new(move || sweep_records(manager, older_than))
}

async fn sweep_records(manager: Weak<TaskManager>, older_than: Duration) -> TaskResult {
    let manager = manager
        .upgrade()
        .ok_or_else(|| anyhow!("task manager is gone"))?;
    let removed = manager.cleanup(older_than).await;
    Ok(json!({ "removed": removed }))
}
