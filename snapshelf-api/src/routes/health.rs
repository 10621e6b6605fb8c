/// Welcome and health check endpoints
///
/// `GET /health` verifies:
/// - The server is running
/// - Database connectivity
/// - Queue broker connectivity
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "queue": "connected"
/// }
/// ```
///
/// Status is 200 when both dependencies answer and 503 otherwise, so load
/// balancers can act on the code alone.

use crate::app::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use snapshelf_shared::db::pool::health_check_within;
use std::time::Duration;

/// Upper bound for each dependency probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`
    pub status: String,

    /// Application version
    pub version: String,

    /// `connected` or `disconnected`
    pub database: String,

    /// `connected` or `disconnected`
    pub queue: String,
}

/// Welcome message
pub async fn root() -> Json<Value> {
    tracing::debug!("Root endpoint accessed");
    Json(json!({
        "message": "Welcome to the Snapshelf API!",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (database_up, queue_up) = tokio::join!(
        health_check_within(&state.db, PROBE_TIMEOUT),
        probe_queue(&state),
    );

    let status = if database_up && queue_up {
        StatusCode::OK
    } else {
        tracing::warn!(database_up, queue_up, "Health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if status == StatusCode::OK { "healthy" } else { "unhealthy" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: connection_label(database_up),
            queue: connection_label(queue_up),
        }),
    )
}

async fn probe_queue(state: &AppState) -> bool {
    match tokio::time::timeout(PROBE_TIMEOUT, state.broker.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Queue health check failed");
            false
        }
        Err(_) => {
            tracing::warn!("Queue health check timed out");
            false
        }
    }
}

fn connection_label(up: bool) -> String {
    if up { "connected" } else { "disconnected" }.to_string()
}
