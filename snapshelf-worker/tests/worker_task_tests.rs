/// Worker Task and orchestrator tests over in-memory seams
///
/// Every collaborator is in-process: `InMemoryItemRepository`,
/// `InMemoryBroker`, in-memory object storage and a scripted page fetcher.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use snapshelf_shared::models::item::{CompleteItem, Item, ItemStatus};
use snapshelf_shared::models::item_attempt::AttemptOutcome;
use snapshelf_shared::queue::{InMemoryBroker, JobBroker, QueueError, ReservedJob, ScrapeJob};
use snapshelf_shared::storage::MediaStorage;
use snapshelf_worker::config::WorkerSettings;
use snapshelf_worker::orchestrator::{GenerationExit, WorkerOrchestrator};
use snapshelf_worker::repository::{InMemoryItemRepository, ItemRepository};
use snapshelf_worker::retry::RetryPolicy;
use snapshelf_worker::scraper::{FetchedImage, PageFetcher, Platform, ScrapeError, Scraper};
use snapshelf_worker::task::{storage_key, ScrapeTask, SkipReason, TaskOutcome};
use snapshelf_worker::timeout::TimeLimits;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const CDN: &str = "https://cdn.test";
const TIKTOK_URL: &str = "https://www.tiktok.com/@noodlefan/video/7300000000000000000";

fn tiktok_page() -> String {
    let data = serde_json::json!({
        "__DEFAULT_SCOPE__": {
            "webapp.video-detail": {
                "itemInfo": {
                    "itemStruct": {
                        "desc": "best ramen in town",
                        "author": { "uniqueId": "noodlefan" },
                        "video": { "cover": "https://p16.tiktokcdn.com/cover.jpeg" },
                        "diversificationLabels": ["Food"],
                        "suggestedWords": ["ramen"]
                    }
                }
            }
        }
    });
    format!(
        r#"<html><body><script id="__UNIVERSAL_DATA_FOR_REHYDRATION__">{}</script></body></html>"#,
        data
    )
}

/// Page fetcher with scripted responses
struct StubFetcher {
    page: Mutex<Result<String, ScrapeError>>,
    image: Mutex<Result<FetchedImage, ScrapeError>>,
    hang: bool,
    page_calls: AtomicUsize,
    image_calls: AtomicUsize,
}

impl StubFetcher {
    fn new(page: Result<String, ScrapeError>) -> Self {
        StubFetcher {
            page: Mutex::new(page),
            image: Mutex::new(Ok(FetchedImage {
                bytes: Bytes::from_static(b"\xff\xd8\xff\xe0jpeg"),
                content_type: "image/jpeg".to_string(),
            })),
            hang: false,
            page_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
        }
    }

    fn hanging() -> Self {
        StubFetcher {
            hang: true,
            ..StubFetcher::new(Ok(tiktok_page()))
        }
    }

    fn set_page(&self, page: Result<String, ScrapeError>) {
        *self.page.lock().unwrap() = page;
    }

    fn set_image(&self, image: Result<FetchedImage, ScrapeError>) {
        *self.image.lock().unwrap() = image;
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch_page(&self, _url: &str, _platform: Platform) -> Result<String, ScrapeError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.page.lock().unwrap().clone()
    }

    async fn fetch_image(&self, _url: &str) -> Result<FetchedImage, ScrapeError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.image.lock().unwrap().clone()
    }
}

struct Harness {
    repo: Arc<InMemoryItemRepository>,
    broker: Arc<InMemoryBroker>,
    storage: MediaStorage,
    fetcher: Arc<StubFetcher>,
    task: ScrapeTask,
}

impl Harness {
    fn new(fetcher: StubFetcher) -> Self {
        Self::with_limits(fetcher, TimeLimits::default())
    }

    fn with_limits(fetcher: StubFetcher, limits: TimeLimits) -> Self {
        let repo = Arc::new(InMemoryItemRepository::new());
        let broker = Arc::new(InMemoryBroker::new());
        let storage = MediaStorage::in_memory(CDN);
        let fetcher = Arc::new(fetcher);

        let task = ScrapeTask::new(
            repo.clone(),
            broker.clone(),
            storage.clone(),
            Scraper::new(fetcher.clone()),
            RetryPolicy::new(2, Duration::from_secs(90), Duration::from_secs(900)),
            limits,
        );

        Harness {
            repo,
            broker,
            storage,
            fetcher,
            task,
        }
    }

    fn submit(&self, url: &str) -> (Item, ScrapeJob) {
        let task_id = Uuid::new_v4();
        let item = self.repo.insert_pending(Uuid::new_v4(), url, task_id);
        let job = ScrapeJob::new(task_id, item.id, url);
        (item, job)
    }

    /// Takes the single scheduled retry out of the delayed set
    async fn take_retry(&self) -> ScrapeJob {
        let far_future = chrono::Utc::now() + chrono::Duration::days(1);
        assert_eq!(self.broker.promote_due(far_future).await.unwrap(), 1);
        self.broker.reserve("test").await.unwrap().unwrap().job
    }
}

/// Consumes one scripted failure if any are left
fn trip(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Repository whose writes fail a scripted number of times
#[derive(Default)]
struct FlakyRepo {
    inner: Arc<InMemoryItemRepository>,
    begin_failures: AtomicUsize,
    mark_failed_failures: AtomicUsize,
    /// Deletes the item just before the success write lands
    delete_before_success: bool,
}

impl FlakyRepo {
    fn wrapping(inner: Arc<InMemoryItemRepository>) -> Self {
        FlakyRepo {
            inner,
            ..FlakyRepo::default()
        }
    }
}

#[async_trait]
impl ItemRepository for FlakyRepo {
    async fn find(&self, item_id: Uuid) -> Result<Option<Item>, sqlx::Error> {
        self.inner.find(item_id).await
    }

    async fn begin_attempt(&self, item_id: Uuid, task_id: Uuid) -> Result<Option<Item>, sqlx::Error> {
        if trip(&self.begin_failures) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        self.inner.begin_attempt(item_id, task_id).await
    }

    async fn finish_attempt(
        &self,
        task_id: Uuid,
        attempt: i32,
        outcome: AttemptOutcome,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        self.inner.finish_attempt(task_id, attempt, outcome, error).await
    }

    async fn mark_succeeded(
        &self,
        item_id: Uuid,
        task_id: Uuid,
        result: CompleteItem,
    ) -> Result<Option<Item>, sqlx::Error> {
        if self.delete_before_success {
            self.inner.remove(item_id);
        }
        self.inner.mark_succeeded(item_id, task_id, result).await
    }

    async fn mark_failed(&self, item_id: Uuid, task_id: Uuid, error: &str) -> Result<Option<Item>, sqlx::Error> {
        if trip(&self.mark_failed_failures) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        self.inner.mark_failed(item_id, task_id, error).await
    }

    async fn record_error(&self, item_id: Uuid, task_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        self.inner.record_error(item_id, task_id, error).await
    }
}

/// Broker whose `schedule` fails a scripted number of times
struct FlakyBroker {
    inner: Arc<InMemoryBroker>,
    schedule_failures: AtomicUsize,
}

#[async_trait]
impl JobBroker for FlakyBroker {
    async fn enqueue(&self, job: &ScrapeJob) -> Result<(), QueueError> {
        self.inner.enqueue(job).await
    }

    async fn schedule(&self, job: &ScrapeJob, delay: Duration) -> Result<(), QueueError> {
        if trip(&self.schedule_failures) {
            return Err(QueueError::Unavailable("scripted outage".to_string()));
        }
        self.inner.schedule(job, delay).await
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        self.inner.promote_due(now).await
    }

    async fn reserve(&self, worker_id: &str) -> Result<Option<ReservedJob>, QueueError> {
        self.inner.reserve(worker_id).await
    }

    async fn ack(&self, worker_id: &str, job: &ReservedJob) -> Result<(), QueueError> {
        self.inner.ack(worker_id, job).await
    }

    async fn recover(&self, worker_id: &str) -> Result<usize, QueueError> {
        self.inner.recover(worker_id).await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.inner.ping().await
    }
}

/// A task over the harness collaborators but a different repository
fn task_with_repo(h: &Harness, repo: Arc<dyn ItemRepository>) -> ScrapeTask {
    ScrapeTask::new(
        repo,
        h.broker.clone(),
        h.storage.clone(),
        Scraper::new(h.fetcher.clone()),
        RetryPolicy::new(2, Duration::from_secs(90), Duration::from_secs(900)),
        TimeLimits::default(),
    )
}

#[tokio::test]
async fn test_success_stores_image_and_finishes_item() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);

    let outcome = h.task.run(&job).await.unwrap();
    let TaskOutcome::Succeeded(done) = outcome else {
        panic!("expected success, got {:?}", outcome);
    };

    let key = format!("images/{}", item.id);
    assert_eq!(done.status, ItemStatus::Success);
    assert_eq!(done.image_url, Some(format!("{}/{}", CDN, key)));
    assert_eq!(done.storage_key.as_deref(), Some(key.as_str()));
    assert_eq!(done.creator.as_deref(), Some("noodlefan"));
    assert_eq!(done.notes.as_deref(), Some("best ramen in town"));
    assert_eq!(done.tags, vec!["Food".to_string(), "ramen".to_string()]);
    assert!(done.completed_at.is_some());
    assert!(h.storage.exists(&key).await.unwrap());

    let attempts = h.repo.attempts_for(item.id);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt, 1);
    assert_eq!(attempts[0].outcome(), AttemptOutcome::Succeeded);
}

#[tokio::test]
async fn test_redelivered_job_after_success_is_noop() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);

    h.task.run(&job).await.unwrap();
    let before = h.repo.get(item.id).unwrap();

    let outcome = h.task.run(&job).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Skipped(SkipReason::NotPending));
    assert_eq!(h.repo.get(item.id).unwrap(), before);
    assert_eq!(h.fetcher.page_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.repo.len(), 1);
}

#[tokio::test]
async fn test_rerun_after_partial_failure_reuses_stored_object() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);

    // A previous run uploaded the image, then died before updating the item
    let key = format!("images/{}", item.id);
    h.storage
        .put_image(&key, Bytes::from_static(b"first upload"), "image/jpeg")
        .await
        .unwrap();

    let outcome = h.task.run(&job).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Succeeded(_)));

    let (bytes, _) = h.storage.get(&key).await.unwrap();
    assert_eq!(&bytes[..], b"first upload");
    assert_eq!(h.repo.len(), 1);
    assert_eq!(h.repo.get(item.id).unwrap().storage_key.as_deref(), Some(key.as_str()));
}

#[tokio::test]
async fn test_rerun_with_different_image_format_keeps_single_object() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);

    // An earlier run stored a JPEG; this time the CDN serves WebP
    let key = storage_key(&item);
    h.storage
        .put_image(&key, Bytes::from_static(b"\xff\xd8\xff\xe0jpeg"), "image/jpeg")
        .await
        .unwrap();
    h.fetcher.set_image(Ok(FetchedImage {
        bytes: Bytes::from_static(b"RIFF\x00\x00\x00\x00WEBP"),
        content_type: "image/webp".to_string(),
    }));

    let outcome = h.task.run(&job).await.unwrap();
    let TaskOutcome::Succeeded(done) = outcome else {
        panic!("expected success, got {:?}", outcome);
    };

    assert_eq!(done.storage_key.as_deref(), Some(key.as_str()));
    assert_eq!(done.image_url, Some(format!("{}/{}", CDN, key)));

    let (bytes, content_type) = h.storage.get(&key).await.unwrap();
    assert_eq!(&bytes[..], b"\xff\xd8\xff\xe0jpeg");
    assert_eq!(content_type.as_deref(), Some("image/jpeg"));
}

#[tokio::test]
async fn test_item_deleted_mid_run_discards_uploaded_image() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);
    let repo = Arc::new(FlakyRepo {
        delete_before_success: true,
        ..FlakyRepo::wrapping(h.repo.clone())
    });
    let task = task_with_repo(&h, repo);

    let outcome = task.run(&job).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Skipped(SkipReason::StaleTask));
    assert_eq!(h.fetcher.image_calls.load(Ordering::SeqCst), 1);
    assert!(h.repo.get(item.id).is_none());
    assert!(!h.storage.exists(&storage_key(&item)).await.unwrap());
}

#[tokio::test]
async fn test_begin_attempt_failure_defers_job() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);
    let repo = Arc::new(FlakyRepo::wrapping(h.repo.clone()));
    repo.begin_failures.store(1, Ordering::SeqCst);
    let task = task_with_repo(&h, repo);

    let outcome = task.run(&job).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Deferred { .. }));

    let pending = h.repo.get(item.id).unwrap();
    assert_eq!(pending.status, ItemStatus::Pending);
    assert_eq!(pending.attempts, 0);
    assert_eq!(h.fetcher.page_calls.load(Ordering::SeqCst), 0);

    let deferred = h.take_retry().await;
    assert_eq!(deferred.task_id, job.task_id);
    assert_eq!(deferred.attempt, job.attempt);
    assert!(matches!(task.run(&deferred).await.unwrap(), TaskOutcome::Succeeded(_)));
}

#[tokio::test]
async fn test_mark_failed_failure_defers_job() {
    let h = Harness::new(StubFetcher::new(Ok(String::new())));
    let (item, job) = h.submit("https://example.com/some/post");
    let repo = Arc::new(FlakyRepo::wrapping(h.repo.clone()));
    repo.mark_failed_failures.store(1, Ordering::SeqCst);
    let task = task_with_repo(&h, repo);

    let outcome = task.run(&job).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Deferred { .. }));
    assert_eq!(h.repo.get(item.id).unwrap().status, ItemStatus::Pending);

    let deferred = h.take_retry().await;
    assert!(matches!(task.run(&deferred).await.unwrap(), TaskOutcome::Failed { .. }));
    assert_eq!(h.repo.get(item.id).unwrap().status, ItemStatus::Failed);

    let outcomes: Vec<_> = h.repo.attempts_for(item.id).iter().map(|a| a.outcome()).collect();
    assert_eq!(outcomes, vec![AttemptOutcome::Retrying, AttemptOutcome::Failed]);
}

#[tokio::test]
async fn test_transient_failures_exhaust_budget_then_fail() {
    let h = Harness::new(StubFetcher::new(Err(ScrapeError::Http {
        status: 503,
        url: TIKTOK_URL.to_string(),
    })));
    let (item, job) = h.submit(TIKTOK_URL);

    let outcome = h.task.run(&job).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Retrying { next_attempt: 2, .. }));
    let pending = h.repo.get(item.id).unwrap();
    assert_eq!(pending.status, ItemStatus::Pending);
    assert!(pending.last_error.as_deref().unwrap().contains("503"));

    let (due, scheduled) = h.broker.delayed_jobs().remove(0);
    assert_eq!(scheduled.attempt, 2);
    assert_eq!(scheduled.task_id, job.task_id);
    assert!(due > chrono::Utc::now() + chrono::Duration::seconds(80));

    let second = h.take_retry().await;
    let outcome = h.task.run(&second).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Retrying { next_attempt: 3, .. }));

    let third = h.take_retry().await;
    let outcome = h.task.run(&third).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Failed { .. }));

    let failed = h.repo.get(item.id).unwrap();
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert!(failed.last_error.is_some());
    assert!(h.broker.delayed_jobs().is_empty());

    let outcomes: Vec<_> = h.repo.attempts_for(item.id).iter().map(|a| a.outcome()).collect();
    assert_eq!(
        outcomes,
        vec![AttemptOutcome::Retrying, AttemptOutcome::Retrying, AttemptOutcome::Failed]
    );
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let h = Harness::new(StubFetcher::new(Ok(String::new())));
    let (item, job) = h.submit("https://example.com/some/post");

    let outcome = h.task.run(&job).await.unwrap();
    let TaskOutcome::Failed { error } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(error.contains("Unsupported platform"));
    assert_eq!(h.repo.get(item.id).unwrap().status, ItemStatus::Failed);
    assert!(h.broker.delayed_jobs().is_empty());
    assert_eq!(h.fetcher.page_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_image_download_404_fails_immediately() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    h.fetcher.set_image(Err(ScrapeError::Http {
        status: 404,
        url: "https://p16.tiktokcdn.com/cover.jpeg".to_string(),
    }));
    let (item, job) = h.submit(TIKTOK_URL);

    let outcome = h.task.run(&job).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Failed { .. }));
    let failed = h.repo.get(item.id).unwrap();
    assert!(failed.last_error.unwrap().starts_with("Image download failed"));
    assert!(failed.image_url.is_none());
}

#[tokio::test]
async fn test_page_without_media_is_retried() {
    let h = Harness::new(StubFetcher::new(Ok("<html><body>captcha</body></html>".to_string())));
    let (_item, job) = h.submit(TIKTOK_URL);

    let outcome = h.task.run(&job).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Retrying { .. }));

    h.fetcher.set_page(Ok(tiktok_page()));
    let retry = h.take_retry().await;
    assert!(matches!(h.task.run(&retry).await.unwrap(), TaskOutcome::Succeeded(_)));
}

#[tokio::test]
async fn test_stale_and_missing_jobs_are_skipped() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);

    let stale = ScrapeJob::new(Uuid::new_v4(), item.id, TIKTOK_URL);
    assert_eq!(h.task.run(&stale).await.unwrap(), TaskOutcome::Skipped(SkipReason::StaleTask));

    h.repo.remove(item.id);
    assert_eq!(h.task.run(&job).await.unwrap(), TaskOutcome::Skipped(SkipReason::ItemMissing));
    assert_eq!(h.fetcher.page_calls.load(Ordering::SeqCst), 0);
    assert!(h.repo.is_empty());
}

#[tokio::test]
async fn test_unreadable_item_defers_job() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);

    h.repo.set_available(false);
    let outcome = h.task.run(&job).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Deferred { .. }));
    h.repo.set_available(true);

    assert_eq!(h.repo.get(item.id).unwrap().attempts, 0);
    let deferred = h.take_retry().await;
    assert_eq!(deferred.attempt, job.attempt);
    assert!(matches!(h.task.run(&deferred).await.unwrap(), TaskOutcome::Succeeded(_)));
}

#[tokio::test]
async fn test_unrecordable_outcome_is_an_error() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (_item, job) = h.submit(TIKTOK_URL);

    h.repo.set_available(false);
    h.broker.set_available(false);
    assert!(h.task.run(&job).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_hard_time_limit_is_a_transient_failure() {
    let limits = TimeLimits::new(Duration::from_secs(45), Duration::from_secs(60));
    let h = Harness::with_limits(StubFetcher::hanging(), limits);
    let (item, job) = h.submit(TIKTOK_URL);

    let outcome = h.task.run(&job).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Retrying { next_attempt: 2, .. }));

    let pending = h.repo.get(item.id).unwrap();
    assert!(pending.last_error.unwrap().contains("time limit"));
    assert_eq!(h.repo.attempts_for(item.id)[0].outcome(), AttemptOutcome::Retrying);
}

fn settings(max_tasks_per_child: usize) -> WorkerSettings {
    WorkerSettings {
        id: "test-worker".to_string(),
        concurrency: 2,
        max_tasks_per_child,
        poll_interval_ms: 10,
        shutdown_grace_secs: 5,
        ..WorkerSettings::default()
    }
}

#[tokio::test]
async fn test_generation_recycles_after_task_limit() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let jobs: Vec<ScrapeJob> = (0..3).map(|_| h.submit(TIKTOK_URL).1).collect();
    for job in &jobs {
        h.broker.enqueue(job).await.unwrap();
    }

    let orchestrator = WorkerOrchestrator::new(h.broker.clone(), settings(2));
    let Harness { task, broker, repo, .. } = h;

    let (exit, stats) = orchestrator.run_generation(Arc::new(task)).await;
    assert_eq!(exit, GenerationExit::Recycle);
    assert_eq!(stats.claimed, 2);
    assert_eq!(stats.acked, 2);
    assert_eq!(broker.processing_len("test-worker"), 0);
    assert_eq!(broker.ready_jobs(), vec![jobs[2].clone()]);

    let finished = jobs
        .iter()
        .filter(|j| repo.get(j.item_id).unwrap().status == ItemStatus::Success)
        .count();
    assert_eq!(finished, 2);
}

#[tokio::test]
async fn test_generation_stops_when_cancelled() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (_item, job) = h.submit(TIKTOK_URL);
    h.broker.enqueue(&job).await.unwrap();

    let orchestrator = WorkerOrchestrator::new(h.broker.clone(), settings(5));
    orchestrator.shutdown_token().cancel();

    let (exit, stats) = orchestrator.run_generation(Arc::new(h.task)).await;
    assert_eq!(exit, GenerationExit::Shutdown);
    assert_eq!(stats.claimed, 0);
    assert_eq!(h.broker.ready_jobs().len(), 1);
}

#[tokio::test]
async fn test_run_rebuilds_task_each_generation() {
    let repo = Arc::new(InMemoryItemRepository::new());
    let broker = Arc::new(InMemoryBroker::new());
    let storage = MediaStorage::in_memory(CDN);

    let mut item_ids = Vec::new();
    for _ in 0..5 {
        let task_id = Uuid::new_v4();
        let item = repo.insert_pending(Uuid::new_v4(), TIKTOK_URL, task_id);
        broker.enqueue(&ScrapeJob::new(task_id, item.id, TIKTOK_URL)).await.unwrap();
        item_ids.push(item.id);
    }

    let orphan_task = Uuid::new_v4();
    let orphan = repo.insert_pending(Uuid::new_v4(), TIKTOK_URL, orphan_task);
    broker.enqueue(&ScrapeJob::new(orphan_task, orphan.id, TIKTOK_URL)).await.unwrap();
    item_ids.push(orphan.id);
    // Claimed by a crashed run of this worker and never acked
    let _ = broker.reserve("test-worker").await.unwrap().unwrap();

    let orchestrator = Arc::new(WorkerOrchestrator::new(broker.clone(), settings(2)));
    let shutdown = orchestrator.shutdown_token();
    let builds = Arc::new(AtomicUsize::new(0));

    let watcher = {
        let repo = repo.clone();
        let item_ids = item_ids.clone();
        tokio::spawn(async move {
            loop {
                let done = item_ids
                    .iter()
                    .all(|id| repo.get(*id).map(|i| i.status) == Some(ItemStatus::Success));
                if done {
                    shutdown.cancel();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let run = {
        let builds = builds.clone();
        let repo = repo.clone();
        let broker = broker.clone();
        let storage = storage.clone();
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .run(move || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(ScrapeTask::new(
                        repo.clone(),
                        broker.clone(),
                        storage.clone(),
                        Scraper::new(Arc::new(StubFetcher::new(Ok(tiktok_page())))),
                        RetryPolicy::default(),
                        TimeLimits::default(),
                    ))
                })
                .await
        }
    };

    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("worker did not finish")
        .unwrap();
    watcher.await.unwrap();

    // 6 jobs at 2 per generation, plus the final generation that saw shutdown
    assert!(builds.load(Ordering::SeqCst) >= 3);
    assert_eq!(broker.processing_len("test-worker"), 0);
    assert!(broker.ready_jobs().is_empty());
}

#[tokio::test]
async fn test_generation_redelivers_unsettled_job() {
    let h = Harness::new(StubFetcher::new(Ok(tiktok_page())));
    let (item, job) = h.submit(TIKTOK_URL);
    h.broker.enqueue(&job).await.unwrap();

    // The attempt cannot start and the deferral cannot be scheduled either
    let repo = Arc::new(FlakyRepo::wrapping(h.repo.clone()));
    repo.begin_failures.store(1, Ordering::SeqCst);
    let broker = Arc::new(FlakyBroker {
        inner: h.broker.clone(),
        schedule_failures: AtomicUsize::new(1),
    });
    let task = ScrapeTask::new(
        repo,
        broker.clone(),
        h.storage.clone(),
        Scraper::new(h.fetcher.clone()),
        RetryPolicy::default(),
        TimeLimits::default(),
    );

    let orchestrator = WorkerOrchestrator::new(broker, settings(2));
    let (exit, stats) = tokio::time::timeout(Duration::from_secs(10), orchestrator.run_generation(Arc::new(task)))
        .await
        .expect("generation did not finish");

    assert_eq!(exit, GenerationExit::Recycle);
    assert_eq!(stats.claimed, 2);
    assert_eq!(stats.unsettled, 1);
    assert_eq!(stats.acked, 1);

    let done = h.repo.get(item.id).unwrap();
    assert_eq!(done.status, ItemStatus::Success);
    assert_eq!(done.attempts, 1);
    assert_eq!(h.broker.processing_len("test-worker"), 0);
    assert!(h.broker.ready_jobs().is_empty());
    assert!(h.broker.delayed_jobs().is_empty());
}
