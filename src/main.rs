use std::sync::Arc;

use spendywise_tasks::config::AppConfig;
use spendywise_tasks::error::Result;
use spendywise_tasks::jobs;
use spendywise_tasks::store::{Database, InMemoryDatabase};
use spendywise_tasks::worker::{Scheduler, TaskManager};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.manager.worker_count,
        tick = ?config.scheduler.tick,
        "Starting background task service"
    );

    let store: Arc<dyn Database> = Arc::new(InMemoryDatabase::new());

    let manager = Arc::new(TaskManager::new(config.manager.clone()));
    manager.start().await;

    let scheduler = Scheduler::new(config.scheduler.clone(), Arc::clone(&manager));
    jobs::setup_periodic_tasks(&scheduler, &manager, store, &config.periodic).await?;
    scheduler.start().await?;

    wait_for_shutdown_signal().await?;
    tracing::info!("Shutdown signal received");

    scheduler.stop().await;
    if let Err(e) = manager.stop(config.manager.shutdown_grace).await {
        tracing::error!(error = %e, "Task manager did not stop cleanly");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Console logging, plus a daily rolling file when a log directory is set.
fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tasks.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
