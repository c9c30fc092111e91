//! Configuration types.
//!
//! The task manager and scheduler never read the environment themselves; the
//! binary builds an [`AppConfig`] once at startup and hands the pieces down.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Task manager configuration.
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Number of concurrent worker loops.
    pub worker_count: usize,
    /// How long a worker waits on the queue before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// Polling interval used by `wait`.
    pub wait_poll_interval: Duration,
    /// Default grace period for in-flight work during shutdown.
    pub shutdown_grace: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            poll_timeout: Duration::from_secs(1),
            wait_poll_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl TaskManagerConfig {
    /// Default config with a specific worker count.
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }
}

/// Periodic scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the control loop wakes to look for due jobs.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60), // 1 minute
        }
    }
}

/// Intervals for the housekeeping jobs registered at startup.
#[derive(Debug, Clone)]
pub struct PeriodicTasksConfig {
    /// How often finished task records are swept.
    pub cleanup_interval: Duration,
    /// Age after which finished task records are swept.
    pub task_retention: Duration,
    /// How often expired sessions are purged.
    pub session_cleanup_interval: Duration,
}

impl Default for PeriodicTasksConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(3600),          // 1 hour
            task_retention: Duration::from_secs(24 * 3600),       // 24 hours
            session_cleanup_interval: Duration::from_secs(21600), // 6 hours
        }
    }
}

/// Everything the binary needs, built from environment variables.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub manager: TaskManagerConfig,
    pub scheduler: SchedulerConfig,
    pub periodic: PeriodicTasksConfig,
    /// Directory for rolling log files; stdout only when unset.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build config from environment variables. Unset variables keep their
    /// defaults; set but unparseable ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse_var::<usize, _>(&lookup, "TASKS_WORKER_COUNT")? {
            config.manager.worker_count = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TASKS_POLL_TIMEOUT_MS")? {
            config.manager.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TASKS_WAIT_POLL_MS")? {
            if ms > 100 {
                return Err(ConfigError::InvalidValue {
                    key: "TASKS_WAIT_POLL_MS".to_string(),
                    message: format!("{ms} exceeds the 100ms maximum"),
                });
            }
            config.manager.wait_poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "TASKS_SHUTDOWN_GRACE_SECS")? {
            config.manager.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "TASKS_SCHEDULER_TICK_SECS")? {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "TASKS_SCHEDULER_TICK_SECS".to_string(),
                    message: "tick must be at least one second".to_string(),
                });
            }
            config.scheduler.tick = Duration::from_secs(secs);
        }
        if let Some(interval) = duration_var(&lookup, "TASKS_CLEANUP_INTERVAL_MINS", 60, false)? {
            config.periodic.cleanup_interval = interval;
        }
        if let Some(retention) = duration_var(&lookup, "TASKS_RETENTION_HOURS", 3600, true)? {
            config.periodic.task_retention = retention;
        }
        if let Some(interval) = duration_var(&lookup, "TASKS_SESSION_CLEANUP_MINS", 60, false)? {
            config.periodic.session_cleanup_interval = interval;
        }

        config.log_dir = lookup("TASKS_LOG_DIR")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

/// Read a count of `unit_secs`-second units as a duration.
fn duration_var<F>(
    lookup: &F,
    key: &str,
    unit_secs: u64,
    allow_zero: bool,
) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(count) = parse_var::<u64, _>(lookup, key)? else {
        return Ok(None);
    };
    if count == 0 && !allow_zero {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "interval must be non-zero".to_string(),
        });
    }
    count
        .checked_mul(unit_secs)
        .map(|secs| Some(Duration::from_secs(secs)))
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{count} is too large"),
        })
}
