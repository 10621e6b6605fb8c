//! # Snapshelf Worker
//!
//! Queue consumer that scrapes submitted URLs.
//!
//! ## Architecture
//!
//! The worker:
//! - Runs pending migrations, then requeues jobs it left unacknowledged
//! - Claims jobs from Redis up to `WORKER_CONCURRENCY` at a time
//! - Scrapes, uploads to object storage and updates the item
//! - Retries transient failures with backoff through the delayed set
//! - Rebuilds its scraper every `WORKER_MAX_TASKS_PER_CHILD` tasks
//! - Drains in-flight tasks on SIGINT/SIGTERM
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p snapshelf-worker
//! ```

use anyhow::Context;
use snapshelf_shared::db::migrations::run_migrations;
use snapshelf_shared::db::pool::{close_pool, create_pool, DatabaseConfig};
use snapshelf_shared::queue::{JobBroker, RedisBroker};
use snapshelf_shared::redis::{RedisClient, RedisConfig};
use snapshelf_shared::storage::{MediaStorage, StorageConfig};
use snapshelf_worker::config::WorkerSettings;
use snapshelf_worker::orchestrator::WorkerOrchestrator;
use snapshelf_worker::repository::{ItemRepository, PgItemRepository};
use snapshelf_worker::scraper::{HttpFetcher, Scraper};
use snapshelf_worker::task::ScrapeTask;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Snapshelf Worker v{} starting...", snapshelf_worker::VERSION);

    let settings = WorkerSettings::load()?;

    let db_config = DatabaseConfig::from_env()?;
    let pool = create_pool(db_config).await.context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;

    let redis_config = RedisConfig::from_env();
    let redis = RedisClient::new(redis_config)
        .await
        .context("Failed to connect to Redis")?;
    tracing::info!(url = %redis.display_url(), "Connected to Redis");
    let broker: Arc<dyn JobBroker> = Arc::new(RedisBroker::new(redis));

    let storage_config = StorageConfig::from_env()?;
    let storage = MediaStorage::from_config(&storage_config)?;

    let repo: Arc<dyn ItemRepository> = Arc::new(PgItemRepository::new(pool.clone()));
    let retry = settings.retry_policy();
    let limits = settings.time_limits();

    let orchestrator = WorkerOrchestrator::new(broker.clone(), settings);
    spawn_signal_handler(orchestrator.shutdown_token());

    let build_task = || -> anyhow::Result<ScrapeTask> {
        let fetcher = HttpFetcher::new().context("Failed to build HTTP client")?;
        Ok(ScrapeTask::new(
            repo.clone(),
            broker.clone(),
            storage.clone(),
            Scraper::new(Arc::new(fetcher)),
            retry,
            limits,
        ))
    };

    tracing::info!("Worker ready and listening for jobs");
    orchestrator.run(build_task).await?;

    close_pool(pool).await;
    tracing::info!("Worker stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "snapshelf_worker=debug,snapshelf_shared=info".into());

    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Cancels `token` on SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for SIGINT");
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
                    tracing::error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
        }
        token.cancel();
    });
}
