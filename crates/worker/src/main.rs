use std::sync::Arc;

use anyhow::Context;
use runbench_core::command::TestCommandComposer;
use runbench_core::dispatcher::Dispatcher;
use runbench_core::process::SubprocessRunner;
use runbench_db::{PgDispatchQueue, PgEnvironmentLock, PgRunStore};
use runbench_worker::{LogFormat, QueueWorker, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "runbench_worker=debug,runbench_core=debug,runbench_db=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    init_tracing(config.log_format);
    tracing::info!(
        concurrency = config.concurrency,
        run_timeout_secs = config.run_timeout.as_secs(),
        runner = %config.runner_program,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = runbench_db::create_pool(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    runbench_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    runbench_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Dispatcher ---
    let dispatcher = Dispatcher::new(
        Arc::new(PgRunStore::new(pool.clone())),
        Arc::new(PgEnvironmentLock::new(pool.clone())),
        Arc::new(PgDispatchQueue::new(pool.clone())),
        Arc::new(SubprocessRunner::new(config.test_base_dir.clone())),
        Arc::new(TestCommandComposer::new(
            config.runner_program.clone(),
            config.runner_args.clone(),
        )),
    )
    .with_run_timeout(config.run_timeout);

    // --- Worker ---
    let worker = QueueWorker::new(pool.clone(), Arc::new(dispatcher))
        .with_poll_interval(config.poll_interval)
        .with_concurrency(config.concurrency)
        .with_shutdown_timeout(config.shutdown_timeout);

    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let worker_handle = tokio::spawn(async move {
        worker.run(worker_cancel).await;
    });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    worker_handle.await.context("Queue worker task failed")?;

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
