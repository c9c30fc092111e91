//! Error types for the background task subsystem.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Push error: {0}")]
    Push(#[from] PushError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors signalled by the task manager and scheduler at the call site.
///
/// Failures raised by a task's own work never show up here; they are recorded
/// on the task record instead.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task manager is not running")]
    NotRunning,

    #[error("Task {id} not found")]
    UnknownTask { id: String },

    #[error("Timed out after {timeout:?} waiting for task {id}")]
    Timeout { id: String, timeout: Duration },

    #[error("Task {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },

    #[error("Shutdown grace {grace:?} exceeded; still running: {stuck:?}")]
    GraceExceeded { grace: Duration, stuck: Vec<String> },

    #[error("Scheduled job {name} needs a non-zero interval")]
    InvalidInterval { name: String },

    #[error("Scheduler tick must be non-zero")]
    InvalidTick,
}

/// Data store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

/// Push delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("Push batch request failed: {reason}")]
    RequestFailed { reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
