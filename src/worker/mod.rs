//! Worker system — background task execution with periodic scheduling.
//!
//! Core components:
//! - `state` — Task state machine (Pending → Running → Completed/Failed, Pending → Cancelled)
//! - `record` — Task records and their timestamps
//! - `task` — The opaque unit of work a task runs
//! - `queue` — FIFO hand-off between submitters and workers
//! - `pool` — Worker loops that execute queued tasks
//! - `manager` — TaskManager: submit, query, await, cancel, cleanup
//! - `scheduler` — Re-submits named jobs on a fixed interval

pub mod manager;
mod pool;
mod queue;
pub mod record;
pub mod scheduler;
pub mod state;
pub mod task;

pub use manager::{TaskManager, TaskSummary};
pub use pool::PoolStats;
pub use record::TaskRecord;
pub use scheduler::{ScheduledJobInfo, Scheduler, WorkFactory};
pub use state::TaskStatus;
pub use task::{TaskResult, TaskWork};
