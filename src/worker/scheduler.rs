//! Periodic scheduler — re-submits named jobs into the task manager on a timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::TaskError;
use crate::worker::manager::TaskManager;
use crate::worker::task::TaskWork;

/// Builds a fresh unit of work for every firing.
pub type WorkFactory = Arc<dyn Fn() -> TaskWork + Send + Sync>;

type JobTable = Arc<RwLock<HashMap<String, ScheduledJob>>>;

struct ScheduledJob {
    name: String,
    job_id: String,
    factory: WorkFactory,
    interval: Duration,
    step: chrono::Duration,
    next_run_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    run_count: u64,
}

impl ScheduledJob {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at <= now
    }

    /// Record a firing at `now` and move `next_run_at` to the next grid point
    /// after it. Missed grid points are skipped, not replayed.
    fn advance(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.run_count += 1;

        let next = self.next_run_at + self.step;
        if next > now {
            self.next_run_at = next;
            return;
        }

        let behind = (now - next).num_nanoseconds();
        let step = self.step.num_nanoseconds();
        self.next_run_at = match (behind, step) {
            (Some(behind), Some(step)) if step > 0 => {
                now + chrono::Duration::nanoseconds(step - behind % step)
            }
            _ => now + self.step,
        };
    }

    fn info(&self) -> ScheduledJobInfo {
        ScheduledJobInfo {
            name: self.name.clone(),
            job_id: self.job_id.clone(),
            interval: self.interval,
            next_run_at: self.next_run_at,
            last_run_at: self.last_run_at,
            run_count: self.run_count,
        }
    }
}

/// Snapshot of one scheduled job.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJobInfo {
    pub name: String,
    pub job_id: String,
    pub interval: Duration,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
}

/// Fires registered jobs into a [`TaskManager`] when they come due.
pub struct Scheduler {
    config: SchedulerConfig,
    manager: Arc<TaskManager>,
    jobs: JobTable,
    control: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, manager: Arc<TaskManager>) -> Self {
        Self {
            config,
            manager,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            control: Mutex::new(None),
        }
    }

    /// Register `factory` to run every `interval`, first firing one interval
    /// from now. Replaces any job already registered under `name`.
    pub async fn schedule<F>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        factory: F,
    ) -> Result<(), TaskError>
    where
        F: Fn() -> TaskWork + Send + Sync + 'static,
    {
        let name = name.into();
        let step = match chrono::Duration::from_std(interval) {
            Ok(step) if !interval.is_zero() => step,
            _ => return Err(TaskError::InvalidInterval { name }),
        };

        let job = ScheduledJob {
            job_id: format!("periodic_{name}"),
            name: name.clone(),
            factory: Arc::new(factory),
            interval,
            step,
            next_run_at: Utc::now() + step,
            last_run_at: None,
            run_count: 0,
        };

        let replaced = self.jobs.write().await.insert(name.clone(), job).is_some();
        info!(job = %name, interval = ?interval, replaced, "Scheduled periodic task");
        Ok(())
    }

    /// Remove a job. Returns `false` if nothing was registered under `name`.
    pub async fn unschedule(&self, name: &str) -> bool {
        let removed = self.jobs.write().await.remove(name).is_some();
        if removed {
            info!(job = %name, "Unscheduled periodic task");
        }
        removed
    }

    /// Snapshots of every registered job, ordered by name.
    pub async fn jobs(&self) -> Vec<ScheduledJobInfo> {
        let mut jobs: Vec<ScheduledJobInfo> =
            self.jobs.read().await.values().map(ScheduledJob::info).collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    /// Submit every job due at `now`. Returns how many were submitted.
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        fire_due(&self.jobs, &self.manager, now).await
    }

    /// Start the control loop. No-op if already running.
    pub async fn start(&self) -> Result<(), TaskError> {
        if self.config.tick.is_zero() {
            return Err(TaskError::InvalidTick);
        }

        let mut control = self.control.lock().await;
        if control.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = watch::channel(false);
        let jobs = Arc::clone(&self.jobs);
        let manager = Arc::clone(&self.manager);
        let tick = self.config.tick;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = rx.changed() => break,
                    _ = ticker.tick() => {
                        fire_due(&jobs, &manager, Utc::now()).await;
                    }
                }
            }
            debug!("Scheduler loop exited");
        });

        info!(tick = ?tick, "Scheduler started");
        *control = Some((tx, handle));
        Ok(())
    }

    /// Stop the control loop, letting the current tick finish. No-op if not
    /// running.
    pub async fn stop(&self) {
        let Some((tx, handle)) = self.control.lock().await.take() else {
            return;
        };

        let _ = tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler loop ended abnormally");
        }
        info!("Scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.control.lock().await.is_some()
    }
}

async fn fire_due(jobs: &JobTable, manager: &TaskManager, now: DateTime<Utc>) -> usize {
    // Advance under the lock, submit after releasing it.
    let due: Vec<(String, String, WorkFactory)> = {
        let mut jobs = jobs.write().await;
        jobs.values_mut()
            .filter(|job| job.is_due(now))
            .map(|job| {
                job.advance(now);
                (job.name.clone(), job.job_id.clone(), Arc::clone(&job.factory))
            })
            .collect()
    };

    let mut submitted = 0;
    for (name, job_id, factory) in due {
        match manager.submit(name.as_str(), factory()).await {
            Ok(task_id) => {
                debug!(job_id = %job_id, task_id = %task_id, "Submitted periodic task");
                submitted += 1;
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "Could not submit periodic task"),
        }
    }
    submitted
}
