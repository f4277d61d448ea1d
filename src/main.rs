//! JobHub Scheduler, a distributed job scheduling service.
//!
//! Main entry point that wires all crates together and runs the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use jobhub_coord::DistributedLockService;
use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_database::DatabasePool;
use jobhub_worker::notify::notifier_from_config;
use jobhub_worker::task::run_periodic;
use jobhub_worker::{
    CircuitBreakerMonitor, CircuitBreakerService, JobExecutor, LeaseJanitor, PeriodicTask,
    ScheduleResolver, SchedulerOrchestrator, SchedulerSignal,
};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Scheduler error: {e}");
        std::process::exit(1);
    }
}

/// Load configuration from file, environment overlay and `JOBHUB__` variables
fn load_configuration() -> Result<AppConfig, AppError> {
    match std::env::var("JOBHUB_CONFIG") {
        Ok(path) => AppConfig::load_from(&path),
        Err(_) => {
            let env = std::env::var("JOBHUB_ENV").unwrap_or_else(|_| "development".to_string());
            AppConfig::load(&env)
        }
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main scheduler run function
async fn run(mut config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting JobHub scheduler v{}", env!("CARGO_PKG_VERSION"));
    let instance_id = config.scheduler.resolve_instance_id();
    config.scheduler.instance_id = instance_id.clone();

    // ── Step 1: Database connection + migrations ─────────────────
    let db_pool = DatabasePool::connect(&config.database).await?;
    if config.database.run_migrations {
        tracing::info!("Running database migrations...");
        jobhub_database::migration::run_migrations(db_pool.pool()).await?;
    }
    let stores = db_pool.stores();

    // ── Step 2: Distributed locks ────────────────────────────────
    tracing::info!("Initializing lock store (provider: {})...", config.lock.provider);
    let locks = DistributedLockService::from_config(&config.lock).await?;
    if !locks.health_check().await? {
        tracing::warn!("Lock store failed its health check; continuing");
    }

    // ── Step 3: Transition notifications ─────────────────────────
    let notifier = notifier_from_config(&config).await?;
    let breakers = CircuitBreakerService::new(stores.clone(), notifier);

    // ── Step 4: Schedule resolver ────────────────────────────────
    let resolver =
        Arc::new(ScheduleResolver::new().with_holidays(config.scheduler.holidays.iter().copied()));

    // ── Step 5: Job handlers ─────────────────────────────────────
    let mut executor = JobExecutor::new();
    jobhub_worker::jobs::register_builtin(&mut executor, &stores);
    tracing::info!(handlers = ?executor.registered_types(), "Job handlers registered");
    let executor = Arc::new(executor);

    // ── Step 6: Shutdown channel ─────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    let janitor: Arc<dyn PeriodicTask> = Arc::new(LeaseJanitor::new(
        locks.clone(),
        Duration::from_secs(config.lock.purge_interval_seconds.max(1)),
    ));
    background.push(tokio::spawn(run_periodic(janitor, shutdown_rx.clone())));

    // ── Step 7: Circuit breaker monitor ──────────────────────────
    if config.monitor.enabled {
        let monitor: Arc<dyn PeriodicTask> = Arc::new(CircuitBreakerMonitor::new(
            stores.clone(),
            breakers,
            locks.clone(),
            instance_id.clone(),
            config.monitor.clone(),
        ));
        background.push(tokio::spawn(run_periodic(monitor, shutdown_rx.clone())));
    } else {
        tracing::info!("Circuit breaker monitor disabled");
    }

    // ── Step 8: Orchestrator ─────────────────────────────────────
    if config.scheduler.enabled {
        let orchestrator = SchedulerOrchestrator::new(
            stores,
            locks,
            resolver,
            executor,
            Arc::new(SchedulerSignal::new()),
            config.scheduler.clone(),
        );
        let cancel = shutdown_rx.clone();
        background.push(tokio::spawn(async move { orchestrator.run(cancel).await }));
    } else {
        tracing::info!("Orchestrator disabled in this process");
    }

    // ── Step 9: Wait for shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping scheduler...");
    let _ = shutdown_tx.send(true);

    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!("Background task ended abnormally: {e}");
        }
    }

    db_pool.close().await;
    tracing::info!("JobHub scheduler stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
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
