/// The Worker Task: scrape → store → persist for one item
///
/// # Lifecycle
///
/// ```text
/// job ─> load item ──missing──────────────> Skipped (ack)
///           │ ──not pending / stale task──> Skipped (ack)
///           ▼
///        begin attempt (attempts += 1, attempt row "running")
///           │
///           ▼  under the time limits
///        scrape page ─> download image ─> upload images/{item_id} ─> mark success
///           │ error
///           ├─ transient, budget left ─> attempt "retrying", schedule job after backoff
///           └─ otherwise ───────────────> item "failed", attempt "failed"
/// ```
///
/// The storage key depends only on the item id, and every status write is
/// guarded by `status = 'pending'` and the job's `task_id`. Redelivering a
/// job therefore never duplicates an object and never flips a finished
/// item.

use snapshelf_shared::models::item::{CompleteItem, Item};
use snapshelf_shared::models::item_attempt::AttemptOutcome;
use snapshelf_shared::queue::{JobBroker, QueueError, ScrapeJob};
use snapshelf_shared::storage::{MediaStorage, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::repository::ItemRepository;
use crate::retry::RetryPolicy;
use crate::scraper::{ScrapeError, Scraper};
use crate::timeout::TimeLimits;

/// Longest error text stored on an item
const MAX_ERROR_LEN: usize = 500;

/// Failures inside a run
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("Image download failed: {0}")]
    Download(#[source] ScrapeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Task exceeded its time limit of {}s", .0.as_secs())]
    Timeout(Duration),
}

impl TaskError {
    pub fn is_transient(&self) -> bool {
        match self {
            TaskError::Scrape(e) | TaskError::Download(e) => e.is_transient(),
            TaskError::Storage(_) | TaskError::Database(_) | TaskError::Queue(_) | TaskError::Timeout(_) => true,
        }
    }
}

/// Why a job was acknowledged without running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ItemMissing,
    /// Item already finished
    NotPending,
    /// Job belongs to an earlier attempt
    StaleTask,
}

/// How a job was settled
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded(Item),
    /// Rescheduled as run `next_attempt`
    Retrying { next_attempt: u32, delay: Duration },
    Failed { error: String },
    Skipped(SkipReason),
    /// The item could not be loaded; the job was rescheduled unchanged
    Deferred { delay: Duration },
}

/// One generation of the task runner
///
/// The scraper (and its HTTP session) is per generation; the orchestrator
/// builds a new `ScrapeTask` when it recycles.
pub struct ScrapeTask {
    repo: Arc<dyn ItemRepository>,
    broker: Arc<dyn JobBroker>,
    storage: MediaStorage,
    scraper: Scraper,
    retry: RetryPolicy,
    limits: TimeLimits,
}

impl ScrapeTask {
    pub fn new(
        repo: Arc<dyn ItemRepository>,
        broker: Arc<dyn JobBroker>,
        storage: MediaStorage,
        scraper: Scraper,
        retry: RetryPolicy,
        limits: TimeLimits,
    ) -> Self {
        ScrapeTask {
            repo,
            broker,
            storage,
            scraper,
            retry,
            limits,
        }
    }

    /// Runs a job to a settled outcome
    ///
    /// # Errors
    ///
    /// Only when neither the outcome nor a deferral could be recorded
    /// (database and broker down). The caller must then leave the job
    /// unacknowledged so it is recovered later.
    pub async fn run(&self, job: &ScrapeJob) -> Result<TaskOutcome, TaskError> {
        let item = match self.repo.find(job.item_id).await {
            Ok(item) => item,
            Err(e) => return self.defer(job, e.into()).await,
        };

        let Some(item) = item else {
            info!(item_id = %job.item_id, task_id = %job.task_id, "Item no longer exists, dropping job");
            return Ok(TaskOutcome::Skipped(SkipReason::ItemMissing));
        };
        if item.task_id != job.task_id {
            info!(item_id = %item.id, task_id = %job.task_id, current = %item.task_id, "Stale job, skipping");
            return Ok(TaskOutcome::Skipped(SkipReason::StaleTask));
        }
        if item.status.is_terminal() {
            info!(item_id = %item.id, task_id = %job.task_id, status = %item.status, "Item already finished, skipping");
            return Ok(TaskOutcome::Skipped(SkipReason::NotPending));
        }

        let item = match self.repo.begin_attempt(item.id, job.task_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return Ok(TaskOutcome::Skipped(SkipReason::StaleTask)),
            Err(e) => return self.defer(job, e.into()).await,
        };
        let attempt = item.attempts;

        info!(
            item_id = %item.id,
            task_id = %job.task_id,
            attempt,
            url = %item.source_url,
            "Running scrape task"
        );

        let result = match self.limits.run(job.task_id, self.execute(&item)).await {
            Ok(result) => result,
            Err(exceeded) => Err(TaskError::Timeout(exceeded.0)),
        };

        match result {
            Ok(Some(done)) => {
                self.close_attempt(job, attempt, AttemptOutcome::Succeeded, None).await;
                info!(item_id = %done.id, task_id = %job.task_id, attempt, "Item scraped");
                Ok(TaskOutcome::Succeeded(done))
            }
            Ok(None) => {
                // Deleted or re-queued while the run was in flight
                warn!(item_id = %item.id, task_id = %job.task_id, "Item changed during run, result discarded");
                self.discard_orphaned_image(&item).await;
                self.close_attempt(
                    job,
                    attempt,
                    AttemptOutcome::Failed,
                    Some("item changed while the task ran"),
                )
                .await;
                Ok(TaskOutcome::Skipped(SkipReason::StaleTask))
            }
            Err(e) => self.handle_failure(job, &item, attempt, e).await,
        }
    }

    /// Scrape, download, upload and persist. `None` if the success write
    /// found the item no longer pending.
    async fn execute(&self, item: &Item) -> Result<Option<Item>, TaskError> {
        let post = self.scraper.scrape(&item.source_url).await?;
        let image_url = post.image_url.ok_or(ScrapeError::NoMedia)?;

        let image = self.scraper.download(&image_url).await.map_err(TaskError::Download)?;
        let key = storage_key(item);

        if self.storage.exists(&key).await? {
            debug!(item_id = %item.id, key = %key, "Image already stored, skipping upload");
        } else {
            self.storage.put_image(&key, image.bytes, &image.content_type).await?;
        }

        let complete = CompleteItem {
            image_url: self.storage.public_url(&key),
            storage_key: key,
            creator: post.creator,
            notes: post.description,
            tags: post.tags,
        };

        Ok(self.repo.mark_succeeded(item.id, item.task_id, complete).await?)
    }

    async fn handle_failure(
        &self,
        job: &ScrapeJob,
        item: &Item,
        attempt: i32,
        err: TaskError,
    ) -> Result<TaskOutcome, TaskError> {
        let message = truncate_error(&err.to_string());
        let run = u32::try_from(attempt).unwrap_or(u32::MAX);

        if err.is_transient() && self.retry.should_retry(run) {
            let delay = self.retry.delay_for(run);
            let mut next = job.next_attempt();
            next.attempt = run.saturating_add(1);

            match self.broker.schedule(&next, delay).await {
                Ok(()) => {
                    if let Err(e) = self.repo.record_error(item.id, job.task_id, &message).await {
                        warn!(item_id = %item.id, task_id = %job.task_id, error = %e, "Could not record error on item");
                    }
                    self.close_attempt(job, attempt, AttemptOutcome::Retrying, Some(&message)).await;
                    warn!(
                        item_id = %item.id,
                        task_id = %job.task_id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %message,
                        "Transient failure, retry scheduled"
                    );
                    return Ok(TaskOutcome::Retrying {
                        next_attempt: next.attempt,
                        delay,
                    });
                }
                Err(schedule_err) => {
                    error!(
                        item_id = %item.id,
                        task_id = %job.task_id,
                        error = %schedule_err,
                        "Could not schedule retry, failing item"
                    );
                }
            }
        }

        if let Err(e) = self.repo.mark_failed(item.id, job.task_id, &message).await {
            // Item stays pending; the redelivered job settles it
            self.close_attempt(job, attempt, AttemptOutcome::Retrying, Some(&message)).await;
            return self.defer(job, e.into()).await;
        }
        self.close_attempt(job, attempt, AttemptOutcome::Failed, Some(&message)).await;

        error!(
            item_id = %item.id,
            task_id = %job.task_id,
            attempt,
            transient = err.is_transient(),
            error = %message,
            "Scrape task failed"
        );
        Ok(TaskOutcome::Failed { error: message })
    }

    /// Reschedules the job unchanged when the item could not be read or written
    async fn defer(&self, job: &ScrapeJob, err: TaskError) -> Result<TaskOutcome, TaskError> {
        let delay = self.retry.delay_for(job.attempt);
        warn!(item_id = %job.item_id, task_id = %job.task_id, error = %err, "Item store unavailable, deferring job");

        let mut again = job.clone();
        again.enqueued_at = chrono::Utc::now();
        self.broker.schedule(&again, delay).await?;
        Ok(TaskOutcome::Deferred { delay })
    }

    /// Attempt rows are history; a failed write is logged and the item state stands
    async fn close_attempt(&self, job: &ScrapeJob, attempt: i32, outcome: AttemptOutcome, error: Option<&str>) {
        if let Err(e) = self.repo.finish_attempt(job.task_id, attempt, outcome, error).await {
            warn!(
                item_id = %job.item_id,
                task_id = %job.task_id,
                attempt,
                outcome = outcome.as_str(),
                error = %e,
                "Could not close attempt row"
            );
        }
    }

    /// Removes the uploaded image of an item deleted while the run was in flight
    async fn discard_orphaned_image(&self, item: &Item) {
        match self.repo.find(item.id).await {
            Ok(None) => {
                let key = storage_key(item);
                match self.storage.delete(&key).await {
                    Ok(()) => info!(item_id = %item.id, key = %key, "Deleted image of removed item"),
                    Err(e) => warn!(item_id = %item.id, key = %key, error = %e, "Could not delete image of removed item"),
                }
            }
            Ok(Some(_)) => {}
            Err(e) => warn!(item_id = %item.id, error = %e, "Could not check whether item still exists"),
        }
    }
}

/// `images/{item_id}`; the content type travels as object metadata
pub fn storage_key(item: &Item) -> String {
    format!("images/{}", item.id)
}

fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_ERROR_LEN).collect();
    truncated.push('…');
    truncated
}
