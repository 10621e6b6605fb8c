/// Item endpoints
///
/// Every endpoint is scoped to the authenticated user. Another user's item
/// answers 404, never 403, so item ids do not leak.
///
/// # Endpoints
///
/// - `GET /v1/items?skip=0&limit=10` - List, newest first (`X-Total-Count` header)
/// - `GET /v1/items/:id` - One item
/// - `PATCH /v1/items/:id` - Edit tags, category, notes, creator
/// - `DELETE /v1/items/:id` - Delete item and its stored image
/// - `GET /v1/items/:id/status` - Processing status
/// - `GET /v1/items/:id/attempts` - Worker run history
/// - `POST /v1/items/:id/retry` - Re-queue a failed item

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::routes::submit::{enqueue_or_fail, SubmitUrlResponse};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapshelf_shared::auth::middleware::AuthContext;
use snapshelf_shared::models::item::{Item, ItemStatus, UpdateItem};
use snapshelf_shared::models::item_attempt::ItemAttempt;
use uuid::Uuid;

/// Default page size
pub const DEFAULT_LIMIT: i64 = 10;

/// Largest page size
pub const MAX_LIMIT: i64 = 100;

const MAX_TAGS: usize = 50;
const MAX_TAG_LENGTH: usize = 100;
const MAX_CATEGORY_LENGTH: usize = 100;
const MAX_CREATOR_LENGTH: usize = 255;

static TOTAL_COUNT: HeaderName = HeaderName::from_static("x-total-count");

/// Pagination parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,

    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

impl ListQuery {
    fn validate(&self) -> ApiResult<()> {
        if self.skip < 0 {
            return Err(ApiError::invalid("skip", "skip must not be negative"));
        }
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(ApiError::invalid(
                "limit",
                format!("limit must be between 1 and {}", MAX_LIMIT),
            ));
        }
        Ok(())
    }
}

/// Processing status of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStatusResponse {
    pub item_id: Uuid,
    pub task_id: Uuid,
    pub status: ItemStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Item> for ItemStatusResponse {
    fn from(item: &Item) -> Self {
        Self {
            item_id: item.id,
            task_id: item.task_id,
            status: item.status,
            attempts: item.attempts,
            last_error: item.last_error.clone(),
            image_url: item.image_url.clone(),
            updated_at: item.updated_at,
        }
    }
}

/// Lists the caller's items, newest first
pub async fn list_items(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<(HeaderMap, Json<Vec<Item>>)> {
    query.validate()?;

    let (items, total) = tokio::try_join!(
        Item::list_for_user(&state.db, auth.user_id, query.limit, query.skip),
        Item::count_for_user(&state.db, auth.user_id),
    )?;

    tracing::debug!(user_id = %auth.user_id, skip = query.skip, limit = query.limit, total, "Listed items");

    let mut headers = HeaderMap::new();
    headers.insert(TOTAL_COUNT.clone(), HeaderValue::from(total));
    Ok((headers, Json(items)))
}

/// Gets one item
pub async fn get_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Json<Item>> {
    Ok(Json(find_owned(&state, &auth, item_id).await?))
}

/// Applies user edits; never changes status
pub async fn update_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
    Json(update): Json<UpdateItem>,
) -> ApiResult<Json<Item>> {
    let update = sanitize_update(update)?;

    if update.is_empty() {
        return Ok(Json(find_owned(&state, &auth, item_id).await?));
    }

    let item = Item::update(&state.db, item_id, auth.user_id, update)
        .await?
        .ok_or_else(item_not_found)?;

    tracing::info!(user_id = %auth.user_id, item_id = %item.id, "Item updated");
    Ok(Json(item))
}

/// Deletes an item and, best effort, its stored image
pub async fn delete_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let item = Item::delete(&state.db, item_id, auth.user_id)
        .await?
        .ok_or_else(item_not_found)?;

    tracing::info!(user_id = %auth.user_id, item_id = %item.id, "Item deleted");

    match (&state.storage, item.storage_key.as_deref()) {
        (Some(storage), Some(key)) => {
            if let Err(e) = storage.delete(key).await {
                tracing::warn!(item_id = %item.id, key, error = %e, "Failed to delete stored image");
            }
        }
        (None, Some(key)) => {
            tracing::warn!(item_id = %item.id, key, "Storage not configured, stored image left in place");
        }
        _ => {}
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Processing status of an item
pub async fn item_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Json<ItemStatusResponse>> {
    let item = find_owned(&state, &auth, item_id).await?;
    Ok(Json(ItemStatusResponse::from(&item)))
}

/// Worker run history, oldest first
pub async fn item_attempts(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ItemAttempt>>> {
    let item = find_owned(&state, &auth, item_id).await?;
    Ok(Json(ItemAttempt::list_for_item(&state.db, item.id).await?))
}

/// Re-queues a failed item under a new task id
///
/// # Errors
///
/// - 404 Not Found: Missing or not owned
/// - 409 Conflict: Item is not failed
/// - 503 Service Unavailable: Queue unreachable (the item goes back to failed)
pub async fn retry_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<SubmitUrlResponse>)> {
    let Some(item) = Item::requeue(&state.db, item_id, auth.user_id, Uuid::new_v4()).await? else {
        let existing = find_owned(&state, &auth, item_id).await?;
        return Err(ApiError::Conflict(format!(
            "Only failed items can be retried (status is {})",
            existing.status
        )));
    };

    tracing::info!(user_id = %auth.user_id, item_id = %item.id, task_id = %item.task_id, "Item re-queued");

    enqueue_or_fail(&state, &item).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitUrlResponse {
            message: "Item re-queued for processing.".to_string(),
            task_id: item.task_id,
            item_id: item.id,
        }),
    ))
}

pub(crate) async fn find_owned(state: &AppState, auth: &AuthContext, item_id: Uuid) -> ApiResult<Item> {
    Item::find_by_id_for_user(&state.db, item_id, auth.user_id)
        .await?
        .ok_or_else(item_not_found)
}

fn item_not_found() -> ApiError {
    ApiError::NotFound("Item not found".to_string())
}

/// Trims fields, deduplicates tags and enforces length limits
fn sanitize_update(mut update: UpdateItem) -> ApiResult<UpdateItem> {
    if let Some(tags) = update.tags.take() {
        let mut clean: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if tag.chars().count() > MAX_TAG_LENGTH {
                return Err(ApiError::invalid(
                    "tags",
                    format!("Tags must be at most {} characters", MAX_TAG_LENGTH),
                ));
            }
            if !clean.iter().any(|t| t == tag) {
                clean.push(tag.to_string());
            }
        }
        if clean.len() > MAX_TAGS {
            return Err(ApiError::invalid("tags", format!("At most {} tags", MAX_TAGS)));
        }
        update.tags = Some(clean);
    }

    if let Some(Some(category)) = update.category.as_mut() {
        *category = category.trim().to_string();
        if category.chars().count() > MAX_CATEGORY_LENGTH {
            return Err(ApiError::invalid(
                "category",
                format!("Category must be at most {} characters", MAX_CATEGORY_LENGTH),
            ));
        }
    }

    if let Some(creator) = update.creator.as_ref() {
        if creator.chars().count() > MAX_CREATOR_LENGTH {
            return Err(ApiError::invalid(
                "creator",
                format!("Creator must be at most {} characters", MAX_CREATOR_LENGTH),
            ));
        }
    }

    Ok(update)
}
