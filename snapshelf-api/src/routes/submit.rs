/// URL submission endpoint
///
/// # Endpoint
///
/// `POST /v1/submit_url`
///
/// # Example Request
///
/// ```json
/// { "url": "https://www.tiktok.com/@someone/video/7300000000000000000" }
/// ```
///
/// # Example Response (202)
///
/// ```json
/// {
///   "message": "URL received and queued for processing.",
///   "task_id": "550e8400-e29b-41d4-a716-446655440000",
///   "item_id": "6ba7b810-9dad-11d1-80b4-00c04fd430c8"
/// }
/// ```
///
/// The Item is created `pending` before the job is enqueued. If the queue
/// rejects the job, the Item is marked `failed` and the request fails with
/// 503, so no Item stays pending without a job behind it.

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use snapshelf_shared::auth::middleware::AuthContext;
use snapshelf_shared::models::item::{CreateItem, Item};
use snapshelf_shared::queue::ScrapeJob;
use uuid::Uuid;
use validator::Validate;

/// Longest URL accepted
pub const MAX_URL_LENGTH: usize = 2048;

/// Submit request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitUrlRequest {
    #[validate(length(min = 1, max = 2048, message = "URL must be between 1 and 2048 characters"))]
    pub url: String,
}

/// Accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitUrlResponse {
    pub message: String,
    pub task_id: Uuid,
    pub item_id: Uuid,
}

/// Submit URL handler
///
/// # Errors
///
/// - 401 Unauthorized: Missing or invalid token
/// - 422 Unprocessable Entity: Not an absolute http(s) URL
/// - 503 Service Unavailable: Queue unreachable (the Item is marked failed)
pub async fn submit_url(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SubmitUrlRequest>,
) -> ApiResult<(StatusCode, Json<SubmitUrlResponse>)> {
    req.validate()?;
    let source_url = normalize_url(&req.url)?;

    let item = Item::create(
        &state.db,
        CreateItem {
            user_id: auth.user_id,
            source_url,
            task_id: Uuid::new_v4(),
        },
    )
    .await?;

    tracing::info!(
        user_id = %auth.user_id,
        item_id = %item.id,
        task_id = %item.task_id,
        url = %item.source_url,
        "URL submitted"
    );

    enqueue_or_fail(&state, &item).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitUrlResponse {
            message: "URL received and queued for processing.".to_string(),
            task_id: item.task_id,
            item_id: item.id,
        }),
    ))
}

/// Enqueues the job for `item`'s current task id
///
/// On failure the item is moved to `failed` so it is never left pending
/// without a job.
pub(crate) async fn enqueue_or_fail(state: &AppState, item: &Item) -> ApiResult<()> {
    let job = ScrapeJob::new(item.task_id, item.id, item.source_url.clone());

    let Err(err) = state.broker.enqueue(&job).await else {
        return Ok(());
    };

    tracing::error!(item_id = %item.id, task_id = %item.task_id, error = %err, "Failed to enqueue scrape job");

    let message = "Failed to queue URL for processing. Please try again later.";
    if let Err(db_err) = Item::mark_failed(&state.db, item.id, item.task_id, message).await {
        tracing::error!(item_id = %item.id, error = %db_err, "Could not mark unqueued item as failed");
    }

    Err(ApiError::ServiceUnavailable(message.to_string()))
}

/// Trims and checks `raw` is an absolute http(s) URL
///
/// Platform support is decided by the worker; an unsupported URL ends as a
/// failed Item with an explanatory error.
pub fn normalize_url(raw: &str) -> ApiResult<String> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed).map_err(|e| ApiError::invalid("url", format!("Invalid URL: {}", e)))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ApiError::invalid("url", "URL must use http or https"));
    }

    Ok(trimmed.to_string())
}
