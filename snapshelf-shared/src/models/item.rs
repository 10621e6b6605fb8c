/// Item model and database operations
///
/// An Item is one submitted social-media URL together with what the worker
/// scraped from it. Items are created by the API at submission time and then
/// advanced by exactly one Worker Task at a time.
///
/// # State Machine
///
/// ```text
/// pending → success
/// pending → failed
/// failed  → pending   (explicit re-queue, new task_id)
/// ```
///
/// Every write that changes `status` is guarded in SQL (`WHERE status = ...`)
/// and, on the worker side, by the job's `task_id`. A stale or duplicate job
/// therefore finds nothing to update and becomes a no-op.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE item_status AS ENUM ('pending', 'success', 'failed');
///
/// CREATE TABLE items (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     source_url TEXT NOT NULL,
///     image_url TEXT,
///     storage_key TEXT,
///     creator VARCHAR(255),
///     notes TEXT,
///     tags TEXT[] NOT NULL DEFAULT '{}',
///     category VARCHAR(100),
///     status item_status NOT NULL DEFAULT 'pending',
///     task_id UUID NOT NULL,
///     attempts INTEGER NOT NULL DEFAULT 0,
///     last_error TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     completed_at TIMESTAMPTZ
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use snapshelf_shared::models::item::{Item, CreateItem};
/// use snapshelf_shared::db::pool::{create_pool, DatabaseConfig};
/// use uuid::Uuid;
///
/// # async fn example(user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::from_env()?).await?;
///
/// let item = Item::create(&pool, CreateItem {
///     user_id,
///     source_url: "https://www.tiktok.com/@someone/video/1".to_string(),
///     task_id: Uuid::new_v4(),
/// }).await?;
///
/// assert!(item.status.is_active());
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Column list shared by every query returning a full row
const ITEM_COLUMNS: &str = "id, user_id, source_url, image_url, storage_key, creator, notes, \
     tags, category, status, task_id, attempts, last_error, created_at, updated_at, completed_at";

/// Processing state of an Item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting for (or being processed by) a worker
    Pending,

    /// Image stored and metadata saved
    Success,

    /// Retry budget exhausted or permanent error
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
        }
    }

    /// Checks if the worker is done with the item
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ItemStatus::Pending)
    }

    /// Checks if transition to target status is allowed
    ///
    /// `Failed → Pending` is the re-queue edge and only happens through
    /// [`Item::requeue`].
    pub fn can_transition_to(&self, target: ItemStatus) -> bool {
        matches!(
            (self, target),
            (ItemStatus::Pending, ItemStatus::Success)
                | (ItemStatus::Pending, ItemStatus::Failed)
                | (ItemStatus::Failed, ItemStatus::Pending)
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted URL and its scrape results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    /// Unique item ID
    pub id: Uuid,

    /// Owner
    pub user_id: Uuid,

    /// URL the user submitted
    pub source_url: String,

    /// Public URL of the stored image (set on success)
    pub image_url: Option<String>,

    /// Object storage key of the image
    pub storage_key: Option<String>,

    /// Account that published the post
    pub creator: Option<String>,

    /// Caption/description, editable by the user
    pub notes: Option<String>,

    /// Tags, editable by the user
    pub tags: Vec<String>,

    /// Free-form category, editable by the user
    pub category: Option<String>,

    /// Processing state
    pub status: ItemStatus,

    /// Job id of the current attempt
    pub task_id: Uuid,

    /// Worker runs under the current `task_id`
    pub attempts: i32,

    /// Most recent error message, if any
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// When the item reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for creating a new item
#[derive(Debug, Clone)]
pub struct CreateItem {
    /// Owner
    pub user_id: Uuid,

    /// Submitted URL
    pub source_url: String,

    /// Job id the API is about to enqueue
    pub task_id: Uuid,
}

/// User-initiated edits
///
/// Only non-None fields are updated. `category` uses `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateItem {
    pub tags: Option<Vec<String>>,

    #[serde(default, with = "double_option")]
    pub category: Option<Option<String>>,

    pub notes: Option<String>,

    pub creator: Option<String>,
}

impl UpdateItem {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.category.is_none() && self.notes.is_none() && self.creator.is_none()
    }
}

/// Results written by a successful Worker Task
///
/// Scraped `notes`, `creator` and `tags` only fill fields the user has not
/// already set while the item was pending.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteItem {
    pub image_url: String,
    pub storage_key: String,
    pub creator: Option<String>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

/// Distinguishes a missing JSON field from an explicit `null`
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

impl Item {
    /// Creates a new item in pending state
    ///
    /// # Errors
    ///
    /// Returns an error if the owner does not exist or the task id collides.
    pub async fn create(pool: &PgPool, data: CreateItem) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO items (user_id, source_url, task_id) VALUES ($1, $2, $3) RETURNING {}",
            ITEM_COLUMNS
        );

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(data.user_id)
            .bind(data.source_url)
            .bind(data.task_id)
            .fetch_one(pool)
            .await?;

        Ok(item)
    }

    /// Finds an item by ID regardless of owner
    ///
    /// Worker-side lookup. API handlers use [`Item::find_by_id_for_user`].
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM items WHERE id = $1", ITEM_COLUMNS);

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(item)
    }

    /// Finds an item by ID, scoped to its owner
    pub async fn find_by_id_for_user(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM items WHERE id = $1 AND user_id = $2",
            ITEM_COLUMNS
        );

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

        Ok(item)
    }

    /// Finds the item whose current attempt has this task id, scoped to its owner
    pub async fn find_by_task_id_for_user(
        pool: &PgPool,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM items WHERE task_id = $1 AND user_id = $2",
            ITEM_COLUMNS
        );

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(task_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

        Ok(item)
    }

    /// Lists a user's items, newest first
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM items WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            ITEM_COLUMNS
        );

        let items = sqlx::query_as::<_, Item>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        Ok(items)
    }

    /// Counts a user's items
    pub async fn count_for_user(pool: &PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

        Ok(count)
    }

    /// Applies user edits
    ///
    /// Never touches `status`. Returns `None` when the item does not exist
    /// or belongs to someone else.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
        data: UpdateItem,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = String::from("UPDATE items SET updated_at = NOW()");
        let mut bind_count = 2;

        if data.tags.is_some() {
            bind_count += 1;
            query.push_str(&format!(", tags = ${}", bind_count));
        }
        if data.category.is_some() {
            bind_count += 1;
            query.push_str(&format!(", category = ${}", bind_count));
        }
        if data.notes.is_some() {
            bind_count += 1;
            query.push_str(&format!(", notes = ${}", bind_count));
        }
        if data.creator.is_some() {
            bind_count += 1;
            query.push_str(&format!(", creator = ${}", bind_count));
        }

        query.push_str(&format!(
            " WHERE id = $1 AND user_id = $2 RETURNING {}",
            ITEM_COLUMNS
        ));

        let mut q = sqlx::query_as::<_, Item>(&query).bind(id).bind(user_id);

        if let Some(tags) = data.tags {
            q = q.bind(tags);
        }
        if let Some(category) = data.category {
            q = q.bind(category);
        }
        if let Some(notes) = data.notes {
            q = q.bind(notes);
        }
        if let Some(creator) = data.creator {
            q = q.bind(creator);
        }

        let item = q.fetch_optional(pool).await?;

        Ok(item)
    }

    /// Deletes an item owned by `user_id`, returning the deleted row
    ///
    /// The caller uses the returned `storage_key` to clean up the stored
    /// image. Attempt history goes with the item (CASCADE).
    pub async fn delete(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "DELETE FROM items WHERE id = $1 AND user_id = $2 RETURNING {}",
            ITEM_COLUMNS
        );

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;

        Ok(item)
    }

    /// Counts one more worker run for the current attempt
    ///
    /// Returns `None` if the item is no longer pending under `task_id`,
    /// which tells the worker the job is stale. Takes any executor so the
    /// worker can pair it with [`ItemAttempt::start`](super::item_attempt::ItemAttempt::start)
    /// in one transaction.
    pub async fn begin_attempt<'e, E>(executor: E, id: Uuid, task_id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let query = format!(
            r#"
            UPDATE items
            SET attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = $1 AND task_id = $2 AND status = 'pending'
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .bind(task_id)
            .fetch_optional(executor)
            .await?;

        Ok(item)
    }

    /// Transitions `pending → success` and stores the scrape results
    ///
    /// Guarded by status and task id; a second call for the same item is a
    /// no-op returning `None`.
    pub async fn mark_succeeded(
        pool: &PgPool,
        id: Uuid,
        task_id: Uuid,
        result: CompleteItem,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE items
            SET status = 'success',
                image_url = $3,
                storage_key = $4,
                creator = COALESCE(creator, $5),
                notes = COALESCE(notes, $6),
                tags = CASE WHEN cardinality(tags) = 0 THEN $7 ELSE tags END,
                last_error = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND task_id = $2 AND status = 'pending'
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .bind(task_id)
            .bind(result.image_url)
            .bind(result.storage_key)
            .bind(result.creator)
            .bind(result.notes)
            .bind(result.tags)
            .fetch_optional(pool)
            .await?;

        Ok(item)
    }

    /// Transitions `pending → failed` with the final error
    pub async fn mark_failed(
        pool: &PgPool,
        id: Uuid,
        task_id: Uuid,
        error: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE items
            SET status = 'failed',
                last_error = $3,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND task_id = $2 AND status = 'pending'
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .bind(task_id)
            .bind(error)
            .fetch_optional(pool)
            .await?;

        Ok(item)
    }

    /// Records a transient error on a pending item without changing status
    pub async fn record_error(
        pool: &PgPool,
        id: Uuid,
        task_id: Uuid,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET last_error = $3,
                updated_at = NOW()
            WHERE id = $1 AND task_id = $2 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(task_id)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Re-queues a failed item as a new attempt
    ///
    /// Moves `failed → pending` under a fresh `task_id` and resets the run
    /// counter. Attempt history rows of the previous task id are kept.
    /// Returns `None` if the item is missing, not owned by `user_id`, or not
    /// failed.
    pub async fn requeue(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
        new_task_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE items
            SET status = 'pending',
                task_id = $3,
                attempts = 0,
                last_error = NULL,
                completed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2 AND status = 'failed'
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );

        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .bind(user_id)
            .bind(new_task_id)
            .fetch_optional(pool)
            .await?;

        Ok(item)
    }
}
