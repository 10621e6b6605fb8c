//! # Snapshelf API Server
//!
//! Accepts social-media URLs, queues them for the scrape worker and serves
//! the resulting items.
//!
//! ## Architecture
//!
//! The API server is built with Axum and provides:
//! - Registration and OAuth2 password-grant tokens (JWT)
//! - URL submission onto the Redis job queue
//! - Item browsing, editing, retry and an SSE status channel
//! - Health reporting for the database and the queue
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p snapshelf-api
//! ```

use anyhow::Context;
use snapshelf_api::app::{build_router, AppState};
use snapshelf_api::config::Config;
use snapshelf_shared::db::migrations::run_migrations;
use snapshelf_shared::db::pool::{close_pool, create_pool};
use snapshelf_shared::queue::{JobBroker, RedisBroker};
use snapshelf_shared::redis::RedisClient;
use snapshelf_shared::storage::MediaStorage;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!(
        "Snapshelf API Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    let pool = create_pool(config.database.clone())
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;

    // Lazy so the API can start (and report unhealthy) while Redis is down
    let redis = RedisClient::lazy(config.redis.clone()).context("Invalid Redis configuration")?;
    tracing::info!(url = %redis.display_url(), "Redis configured");
    let broker: Arc<dyn JobBroker> = Arc::new(RedisBroker::new(redis));

    let storage = match config.storage.as_ref() {
        Some(storage_config) => Some(MediaStorage::from_config(storage_config)?),
        None => {
            tracing::warn!("R2 storage not configured; deleted items keep their stored images");
            None
        }
    };

    let bind_address = config.bind_address();
    let state = AppState::new(pool.clone(), broker, storage, config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    close_pool(pool).await;
    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "snapshelf_api=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
