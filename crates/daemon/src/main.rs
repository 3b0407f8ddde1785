//! Jobstore - Main Entry Point
//! Wires the job repository, result cache, archiving worker and maintenance

mod settings;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobstore_core::application::{
    shutdown_channel, Archiver, ArchiverConfig, MaintenanceConfig, MaintenanceScheduler,
};
use jobstore_core::port::{ContextAuthorization, JobRepository, SystemTimeProvider, TimeProvider};
use jobstore_core::ResultCache;
use jobstore_infra_archive::LocalArchiveClient;
use jobstore_infra_sqlite::{
    create_pool, run_migrations, Driver, PoolSettings, RepositoryOptions, SqliteJobRepository,
    StatementCache,
};
use settings::DaemonConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (file, then JOBSTORE__* overrides)
    let config = DaemonConfig::load().context("Failed to load configuration")?;

    // 2. Initialize logging; the guard flushes the file writer on exit
    let _log_guard = init_logging(config.logging.file.as_deref())?;

    info!("Jobstore v{} starting...", VERSION);

    // 3. Initialize database
    let driver: Driver = config
        .database
        .driver
        .parse()
        .context("Invalid database.driver")?;
    info!(url = %config.database.url, driver = driver.as_str(), "Initializing database...");

    let pool = create_pool(
        &config.database.url,
        PoolSettings {
            max_connections: config.database.max_connections,
            statement_cache_capacity: config.database.statement_cache_capacity,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let stmts = Arc::new(StatementCache::new(pool.clone(), driver));
    let cache = Arc::new(ResultCache::new(config.cache.capacity));
    let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(
        stmts,
        cache,
        Arc::new(ContextAuthorization),
        time_provider.clone(),
        RepositoryOptions {
            short_running_jobs_duration: config.short_running_jobs_duration,
            clusters: config.clusters.clone(),
        },
    ));

    // 5. Start archiving worker
    info!(root = %config.archive.root.display(), "Starting archiving worker...");
    let archiver = Archiver::spawn(
        repo.clone(),
        Arc::new(LocalArchiveClient::new(config.archive.root.clone())),
        ArchiverConfig {
            queue_capacity: config.archive.queue_capacity,
            timeout: config.archive_timeout(),
        },
    );

    // 6. Start maintenance scheduler
    info!("Starting maintenance scheduler...");
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let maintenance = MaintenanceScheduler::new(
        repo.clone(),
        time_provider,
        MaintenanceConfig {
            interval: Duration::from_secs(config.maintenance.interval_secs.max(1)),
            walltime_grace_secs: config.maintenance.walltime_grace_secs,
            retention_days: config.maintenance.retention_days,
        },
    );
    let maintenance_handle = tokio::spawn(maintenance.run(shutdown_rx));

    info!(
        clusters = config.clusters.len(),
        cache_capacity = config.cache.capacity,
        "System ready"
    );
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: drain queued archive tasks, stop maintenance
    archiver.shutdown().await;
    shutdown_tx.shutdown();
    match tokio::time::timeout(Duration::from_secs(5), maintenance_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = ?e, "Maintenance task failed"),
        Err(_) => warn!("Maintenance task did not stop within 5s"),
    }
    pool.close().await;

    info!("Shutdown complete.");

    Ok(())
}

/// Console output is `pretty` unless `JOBSTORE_LOG_FORMAT=json`. With a log
/// file configured, the same events also go to a non-blocking file writer.
fn init_logging(file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let log_format = std::env::var("JOBSTORE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("jobstore=info"))
        .context("Failed to create env filter")?;

    let (file_layer, guard) = match file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .context("logging.file must name a file")?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().json().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    Ok(guard)
}
