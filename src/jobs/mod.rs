//! Background jobs — the units of work the app submits and schedules.
//!
//! Each function binds its collaborators and arguments and returns a
//! [`TaskWork`](crate::worker::TaskWork) ready to submit.

pub mod categorize;
pub mod housekeeping;
pub mod insights;
pub mod notifications;

use std::sync::Arc;

use tracing::info;

use crate::config::PeriodicTasksConfig;
use crate::error::TaskError;
use crate::store::Database;
use crate::worker::{Scheduler, TaskManager};

pub use categorize::sync_transaction_categories;
pub use housekeeping::{cleanup_expired_sessions, cleanup_old_tasks};
pub use insights::process_financial_insights;
pub use notifications::send_push_notifications;

/// Register the standard housekeeping jobs.
pub async fn setup_periodic_tasks(
    scheduler: &Scheduler,
    manager: &Arc<TaskManager>,
    store: Arc<dyn Database>,
    config: &PeriodicTasksConfig,
) -> Result<(), TaskError> {
    let weak = Arc::downgrade(manager);
    let retention = config.task_retention;
    scheduler
        .schedule("cleanup_old_tasks", config.cleanup_interval, move || {
            cleanup_old_tasks(weak.clone(), retention)
        })
        .await?;

    scheduler
        .schedule(
            "cleanup_expired_sessions",
            config.session_cleanup_interval,
            move || cleanup_expired_sessions(Arc::clone(&store)),
        )
        .await?;

    info!("Periodic tasks configured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{SchedulerConfig, TaskManagerConfig};
    use crate::store::InMemoryDatabase;

    #[tokio::test]
    async fn registers_housekeeping_jobs() {
        let manager = Arc::new(TaskManager::new(TaskManagerConfig::with_workers(1)));
        manager.start().await;
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::clone(&manager));
        let store = Arc::new(InMemoryDatabase::new());
        store
            .create_session("u1", chrono::Duration::seconds(-1))
            .await;

        setup_periodic_tasks(
            &scheduler,
            &manager,
            store.clone(),
            &PeriodicTasksConfig::default(),
        )
        .await
        .unwrap();

        let jobs = scheduler.jobs().await;
        let summary: Vec<(&str, Duration)> = jobs
            .iter()
            .map(|j| (j.job_id.as_str(), j.interval))
            .collect();
        assert_eq!(
            summary,
            [
                ("periodic_cleanup_expired_sessions", Duration::from_secs(6 * 3600)),
                ("periodic_cleanup_old_tasks", Duration::from_secs(3600)),
            ]
        );

        // Seven hours on, both are due.
        let later = chrono::Utc::now() + chrono::Duration::hours(7);
        assert_eq!(scheduler.run_due(later).await, 2);

        for record in manager.list().await {
            let done = manager.wait(&record.id, Duration::from_secs(5)).await.unwrap();
            assert_eq!(done.status, crate::worker::TaskStatus::Completed);
            if done.name == "cleanup_expired_sessions" {
                assert_eq!(done.result, Some(serde_json::json!({"cleaned": 1})));
            }
        }
    }
}
