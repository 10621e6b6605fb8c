/// Task status by task id
///
/// # Endpoint
///
/// `GET /v1/task_status/:task_id`
///
/// # Response
///
/// ```json
/// { "task_id": "...", "status": "SUCCESS", "result": { ...item... } }
/// { "task_id": "...", "status": "FAILURE", "result": { "error": "HTTP 404 from ..." } }
/// { "task_id": "...", "status": "RETRY",   "result": null }
/// ```
///
/// | Item | `status` |
/// |---|---|
/// | pending, no run yet | `PENDING` |
/// | pending, running first time | `STARTED` |
/// | pending, last run failed | `RETRY` |
/// | success | `SUCCESS` |
/// | failed | `FAILURE` |
///
/// A task id replaced by a retry no longer resolves (404); the item's new
/// task id is returned by the retry endpoint.

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use snapshelf_shared::auth::middleware::AuthContext;
use snapshelf_shared::models::item::{Item, ItemStatus};
use uuid::Uuid;

/// Task status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub status: String,
    pub result: Option<Value>,
}

impl TaskStatusResponse {
    pub fn from_item(item: &Item) -> Self {
        let result = match item.status {
            ItemStatus::Success => serde_json::to_value(item).ok(),
            ItemStatus::Failed => Some(json!({
                "error": item.last_error.as_deref().unwrap_or("Task failed"),
            })),
            ItemStatus::Pending => None,
        };

        Self {
            task_id: item.task_id,
            status: task_state(item).to_string(),
            result,
        }
    }
}

fn task_state(item: &Item) -> &'static str {
    match item.status {
        ItemStatus::Success => "SUCCESS",
        ItemStatus::Failed => "FAILURE",
        ItemStatus::Pending if item.attempts == 0 => "PENDING",
        ItemStatus::Pending if item.last_error.is_some() => "RETRY",
        ItemStatus::Pending => "STARTED",
    }
}

/// Task status handler
pub async fn task_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<TaskStatusResponse>> {
    let item = Item::find_by_task_id_for_user(&state.db, task_id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    let response = TaskStatusResponse::from_item(&item);
    tracing::debug!(task_id = %task_id, status = %response.status, "Task status");
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: ItemStatus, attempts: i32, last_error: Option<&str>) -> Item {
        let now = chrono::Utc::now();
        Item {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            source_url: "https://www.instagram.com/p/abc/".to_string(),
            image_url: (status == ItemStatus::Success).then(|| "https://cdn.test/images/x.jpg".to_string()),
            storage_key: None,
            creator: None,
            notes: None,
            tags: Vec::new(),
            category: None,
            status,
            task_id: Uuid::new_v4(),
            attempts,
            last_error: last_error.map(str::to_string),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_pending_states() {
        assert_eq!(TaskStatusResponse::from_item(&item(ItemStatus::Pending, 0, None)).status, "PENDING");
        assert_eq!(TaskStatusResponse::from_item(&item(ItemStatus::Pending, 1, None)).status, "STARTED");

        let retrying = TaskStatusResponse::from_item(&item(ItemStatus::Pending, 1, Some("HTTP 503")));
        assert_eq!(retrying.status, "RETRY");
        assert!(retrying.result.is_none());
    }

    #[test]
    fn test_success_carries_item() {
        let done = item(ItemStatus::Success, 1, None);
        let response = TaskStatusResponse::from_item(&done);
        assert_eq!(response.status, "SUCCESS");
        assert_eq!(response.task_id, done.task_id);
        assert_eq!(response.result.unwrap()["image_url"], "https://cdn.test/images/x.jpg");
    }

    #[test]
    fn test_failure_carries_error() {
        let response = TaskStatusResponse::from_item(&item(ItemStatus::Failed, 3, Some("No media found on page")));
        assert_eq!(response.status, "FAILURE");
        assert_eq!(response.result.unwrap()["error"], "No media found on page");
    }
}
