//! Task records — the tracked unit of submitted work and its outcome.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::TaskError;
use crate::worker::state::TaskStatus;

/// Identity and lifecycle state for one submitted task.
///
/// Records handed out by the manager are snapshots; changing a copy has no
/// effect on the table.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Unique task ID.
    pub id: String,
    /// Job name the task was submitted under.
    pub name: String,
    /// Current status.
    pub status: TaskStatus,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When a worker started executing it.
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Value returned by the work; only set when completed.
    pub result: Option<serde_json::Value>,
    /// Error description; only set when failed.
    pub error: Option<String>,
}

impl TaskRecord {
    pub(crate) fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Move to `new_status`, stamping the matching timestamp.
    pub(crate) fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(new_status) {
            return Err(TaskError::InvalidTransition {
                id: self.id.clone(),
                state: self.status.to_string(),
                target: new_status.to_string(),
            });
        }

        // Wall clock can step backwards; never stamp earlier than the last stamp.
        let floor = self.started_at.unwrap_or(self.created_at);
        let now = Utc::now().max(floor);

        self.status = new_status;
        match new_status {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now)
            }
            TaskStatus::Pending => {}
        }

        Ok(())
    }

    pub(crate) fn complete(&mut self, value: serde_json::Value) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Completed)?;
        self.result = Some(value);
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Time spent executing, or running so far.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            end.signed_duration_since(start).to_std().unwrap_or_default()
        })
    }

    /// True once `completed_at` (or, for failures, `created_at`) is at or
    /// before `cutoff`. Active records are never expired.
    pub(crate) fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        if self.status.is_active() {
            return false;
        }
        let finished_before = self.completed_at.is_some_and(|at| at <= cutoff);
        let failed_before = self.status == TaskStatus::Failed && self.created_at <= cutoff;
        finished_before || failed_before
    }
}
