//! Task work — the opaque closure a record is executed with.
//!
//! Callers bind every argument up front and hand over a zero-argument
//! closure. Async closures run on the worker's runtime; synchronous ones go
//! through [`TaskWork::blocking`] so they cannot stall other workers.

use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinError;

/// What a unit of work produces.
pub type TaskResult = anyhow::Result<serde_json::Value>;

/// A zero-argument unit of work, executed at most once.
pub struct TaskWork {
    run: Box<dyn FnOnce() -> BoxFuture<'static, TaskResult> + Send>,
}

impl TaskWork {
    /// Wrap an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            run: Box::new(move || f().boxed()),
        }
    }

    /// Wrap a synchronous closure; it runs on the blocking thread pool.
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        Self::new(move || async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!(describe_join_error(e))),
            }
        })
    }

    pub(crate) fn into_future(self) -> BoxFuture<'static, TaskResult> {
        (self.run)()
    }
}

impl std::fmt::Debug for TaskWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWork").finish_non_exhaustive()
    }
}

/// Human-readable description of a task that did not finish normally.
pub(crate) fn describe_join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn async_work_runs() {
        let work = TaskWork::new(|| async { Ok(serde_json::json!("ok")) });
        assert_eq!(work.into_future().await.unwrap(), serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn blocking_work_runs_off_runtime() {
        let work = TaskWork::blocking(|| {
            std::thread::sleep(std::time::Duration::from_millis(10));
            Ok(serde_json::json!(42))
        });
        assert_eq!(work.into_future().await.unwrap(), serde_json::json!(42));
    }

    #[tokio::test]
    async fn blocking_panic_becomes_error() {
        let work = TaskWork::blocking(|| panic!("kaboom"));
        let err = work.into_future().await.unwrap_err();
        assert_eq!(err.to_string(), "task panicked: kaboom");
    }

    #[tokio::test]
    async fn work_errors_pass_through() {
        let work = TaskWork::new(|| async { Err(anyhow::anyhow!("disk full")) });
        let err = work.into_future().await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }
}
