/// Item status channel (SSE)
///
/// # Endpoint
///
/// `GET /v1/items/:id/events`
///
/// The handler polls the item row and emits a `status` event whenever its
/// status, attempt count or last error changes. The first event is the
/// current state. The stream ends after a terminal status (`success` or
/// `failed`), or with a `deleted` event if the item disappears. Keep-alive
/// comments go out every 15 seconds.
///
/// # SSE Event Format
///
/// ```text
/// event: status
/// id: 2
/// data: {"item_id":"...","task_id":"...","status":"pending","attempts":1,"last_error":"HTTP 503 ...","image_url":null,"updated_at":"..."}
///
/// event: status
/// id: 3
/// data: {"item_id":"...","task_id":"...","status":"success","attempts":2,"last_error":null,"image_url":"https://...","updated_at":"..."}
/// ```
///
/// # Example
///
/// ```bash
/// curl -N -H "Authorization: Bearer <token>" \
///   "http://localhost:8080/v1/items/{item_id}/events"
/// ```

use crate::app::AppState;
use crate::error::ApiResult;
use crate::routes::items::{find_owned, ItemStatusResponse};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use snapshelf_shared::auth::middleware::AuthContext;
use snapshelf_shared::models::item::{Item, ItemStatus};
use sqlx::PgPool;
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

/// How often the item row is re-read
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Stream item status events
///
/// # Errors
///
/// - 401 Unauthorized: Missing or invalid token
/// - 404 Not Found: Item does not exist or belongs to another user
pub async fn item_events(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let item = find_owned(&state, &auth, item_id).await?;

    tracing::info!(user_id = %auth.user_id, item_id = %item.id, status = %item.status, "Streaming item status");

    let stream = status_stream(state.db.clone(), item, auth.user_id, POLL_INTERVAL);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// What the client was last told
type Snapshot = (ItemStatus, i32, Option<String>, Uuid);

struct Poller {
    db: PgPool,
    item_id: Uuid,
    user_id: Uuid,
    interval: Duration,
    /// Row read before the stream started, emitted first
    initial: Option<Item>,
    last: Option<Snapshot>,
    sent: u64,
    finished: bool,
}

fn snapshot(item: &Item) -> Snapshot {
    (item.status, item.attempts, item.last_error.clone(), item.task_id)
}

fn status_stream(
    db: PgPool,
    item: Item,
    user_id: Uuid,
    interval: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let poller = Poller {
        db,
        item_id: item.id,
        user_id,
        interval,
        initial: Some(item),
        last: None,
        sent: 0,
        finished: false,
    };

    stream::unfold(poller, |mut poller| async move {
        if poller.finished {
            return None;
        }

        loop {
            let current = match poller.initial.take() {
                Some(item) => Some(item),
                None => {
                    tokio::time::sleep(poller.interval).await;
                    match Item::find_by_id_for_user(&poller.db, poller.item_id, poller.user_id).await {
                        Ok(found) => found,
                        Err(e) => {
                            tracing::warn!(item_id = %poller.item_id, error = %e, "Status poll failed");
                            continue;
                        }
                    }
                }
            };

            let Some(item) = current else {
                poller.finished = true;
                let event = Event::default()
                    .event("deleted")
                    .data(poller.item_id.to_string());
                return Some((Ok(event), poller));
            };

            let snap = snapshot(&item);
            if poller.last.as_ref() == Some(&snap) {
                continue;
            }

            poller.last = Some(snap);
            poller.sent += 1;
            poller.finished = item.status.is_terminal();
            return Some((Ok(status_event(&item, poller.sent)), poller));
        }
    })
}

fn status_event(item: &Item, id: u64) -> Event {
    let payload = ItemStatusResponse::from(item);
    let data = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());

    Event::default().event("status").id(id.to_string()).data(data)
}
