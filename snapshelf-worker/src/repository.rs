/// Item persistence as seen by the worker
///
/// The worker only reads an item and moves it forward under its `task_id`.
/// [`PgItemRepository`] delegates to the shared models;
/// [`InMemoryItemRepository`] applies the same guards to a map, so the task
/// contract can be exercised without PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use snapshelf_shared::models::item::{CompleteItem, Item, ItemStatus};
use snapshelf_shared::models::item_attempt::{AttemptOutcome, ItemAttempt};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn find(&self, item_id: Uuid) -> Result<Option<Item>, sqlx::Error>;

    /// Counts a run and opens its attempt row
    ///
    /// `None` when the item is no longer pending under `task_id`.
    async fn begin_attempt(&self, item_id: Uuid, task_id: Uuid) -> Result<Option<Item>, sqlx::Error>;

    /// Closes the attempt row opened by `begin_attempt`
    async fn finish_attempt(
        &self,
        task_id: Uuid,
        attempt: i32,
        outcome: AttemptOutcome,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error>;

    async fn mark_succeeded(
        &self,
        item_id: Uuid,
        task_id: Uuid,
        result: CompleteItem,
    ) -> Result<Option<Item>, sqlx::Error>;

    async fn mark_failed(&self, item_id: Uuid, task_id: Uuid, error: &str) -> Result<Option<Item>, sqlx::Error>;

    async fn record_error(&self, item_id: Uuid, task_id: Uuid, error: &str) -> Result<bool, sqlx::Error>;
}

/// PostgreSQL-backed repository
#[derive(Clone)]
pub struct PgItemRepository {
    pool: PgPool,
}

impl PgItemRepository {
    pub fn new(pool: PgPool) -> Self {
        PgItemRepository { pool }
    }
}

#[async_trait]
impl ItemRepository for PgItemRepository {
    async fn find(&self, item_id: Uuid) -> Result<Option<Item>, sqlx::Error> {
        Item::find_by_id(&self.pool, item_id).await
    }

    /// The counter and the attempt row commit together, or neither does
    async fn begin_attempt(&self, item_id: Uuid, task_id: Uuid) -> Result<Option<Item>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(item) = Item::begin_attempt(&mut *tx, item_id, task_id).await? else {
            return Ok(None);
        };
        ItemAttempt::start(&mut *tx, item_id, task_id, item.attempts).await?;

        tx.commit().await?;
        Ok(Some(item))
    }

    async fn finish_attempt(
        &self,
        task_id: Uuid,
        attempt: i32,
        outcome: AttemptOutcome,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        ItemAttempt::finish(&self.pool, task_id, attempt, outcome, error).await
    }

    async fn mark_succeeded(
        &self,
        item_id: Uuid,
        task_id: Uuid,
        result: CompleteItem,
    ) -> Result<Option<Item>, sqlx::Error> {
        Item::mark_succeeded(&self.pool, item_id, task_id, result).await
    }

    async fn mark_failed(&self, item_id: Uuid, task_id: Uuid, error: &str) -> Result<Option<Item>, sqlx::Error> {
        Item::mark_failed(&self.pool, item_id, task_id, error).await
    }

    async fn record_error(&self, item_id: Uuid, task_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        Item::record_error(&self.pool, item_id, task_id, error).await
    }
}

#[derive(Default)]
struct State {
    items: HashMap<Uuid, Item>,
    attempts: Vec<ItemAttempt>,
}

/// Map-backed repository with the same guards as the SQL
pub struct InMemoryItemRepository {
    state: Mutex<State>,
    available: AtomicBool,
}

impl Default for InMemoryItemRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryItemRepository {
    pub fn new() -> Self {
        InMemoryItemRepository {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggles simulated reachability; while unavailable every call fails
    /// with `PoolTimedOut`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Inserts a fresh pending item, as the API does on submit
    pub fn insert_pending(&self, user_id: Uuid, source_url: &str, task_id: Uuid) -> Item {
        let now = Utc::now();
        let item = Item {
            id: Uuid::new_v4(),
            user_id,
            source_url: source_url.to_string(),
            image_url: None,
            storage_key: None,
            creator: None,
            notes: None,
            tags: Vec::new(),
            category: None,
            status: ItemStatus::Pending,
            task_id,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.lock().items.insert(item.id, item.clone());
        item
    }

    /// Replaces or adds an item as-is
    pub fn put(&self, item: Item) {
        self.lock().items.insert(item.id, item);
    }

    pub fn get(&self, item_id: Uuid) -> Option<Item> {
        self.lock().items.get(&item_id).cloned()
    }

    pub fn remove(&self, item_id: Uuid) -> Option<Item> {
        self.lock().items.remove(&item_id)
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempt rows of an item, oldest first
    pub fn attempts_for(&self, item_id: Uuid) -> Vec<ItemAttempt> {
        self.lock()
            .attempts
            .iter()
            .filter(|a| a.item_id == item_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(sqlx::Error::PoolTimedOut)
        }
    }

    /// Applies `f` to the item if it is pending under `task_id`
    fn update_pending<F>(&self, item_id: Uuid, task_id: Uuid, f: F) -> Option<Item>
    where
        F: FnOnce(&mut Item),
    {
        let mut state = self.lock();
        let item = state
            .items
            .get_mut(&item_id)
            .filter(|i| i.task_id == task_id && i.status == ItemStatus::Pending)?;
        f(item);
        item.updated_at = Utc::now();
        Some(item.clone())
    }
}

#[async_trait]
impl ItemRepository for InMemoryItemRepository {
    async fn find(&self, item_id: Uuid) -> Result<Option<Item>, sqlx::Error> {
        self.check()?;
        Ok(self.get(item_id))
    }

    async fn begin_attempt(&self, item_id: Uuid, task_id: Uuid) -> Result<Option<Item>, sqlx::Error> {
        self.check()?;
        let Some(item) = self.update_pending(item_id, task_id, |item| item.attempts += 1) else {
            return Ok(None);
        };

        self.lock().attempts.push(ItemAttempt {
            id: Uuid::new_v4(),
            item_id,
            task_id,
            attempt: item.attempts,
            outcome: AttemptOutcome::Running.as_str().to_string(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        });
        Ok(Some(item))
    }

    async fn finish_attempt(
        &self,
        task_id: Uuid,
        attempt: i32,
        outcome: AttemptOutcome,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        self.check()?;
        let mut state = self.lock();
        let Some(row) = state
            .attempts
            .iter_mut()
            .find(|a| a.task_id == task_id && a.attempt == attempt && a.outcome() == AttemptOutcome::Running)
        else {
            return Ok(false);
        };

        row.outcome = outcome.as_str().to_string();
        row.error = error.map(str::to_string);
        row.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_succeeded(
        &self,
        item_id: Uuid,
        task_id: Uuid,
        result: CompleteItem,
    ) -> Result<Option<Item>, sqlx::Error> {
        self.check()?;
        Ok(self.update_pending(item_id, task_id, |item| {
            item.status = ItemStatus::Success;
            item.image_url = Some(result.image_url);
            item.storage_key = Some(result.storage_key);
            if item.creator.is_none() {
                item.creator = result.creator;
            }
            if item.notes.is_none() {
                item.notes = result.notes;
            }
            if item.tags.is_empty() {
                item.tags = result.tags;
            }
            item.last_error = None;
            item.completed_at = Some(Utc::now());
        }))
    }

    async fn mark_failed(&self, item_id: Uuid, task_id: Uuid, error: &str) -> Result<Option<Item>, sqlx::Error> {
        self.check()?;
        Ok(self.update_pending(item_id, task_id, |item| {
            item.status = ItemStatus::Failed;
            item.last_error = Some(error.to_string());
            item.completed_at = Some(Utc::now());
        }))
    }

    async fn record_error(&self, item_id: Uuid, task_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        self.check()?;
        Ok(self
            .update_pending(item_id, task_id, |item| item.last_error = Some(error.to_string()))
            .is_some())
    }
}
