/// Job queue between the API (producer) and workers (consumers)
///
/// # Architecture
///
/// ```text
///  API ──LPUSH──> {prefix}:ready ──RPOPLPUSH──> {prefix}:processing:{worker_id}
///                     ▲                                   │
///                     │ LPUSH (after ZREM claim)          │ LREM (ack)
///                     │                                   ▼
///               {prefix}:delayed (ZSET, score = due ms)  done
///                     ▲
///                     └── ZADD (retry with backoff)
/// ```
///
/// A job stays in its worker's processing list until acked. If the worker
/// dies, [`JobBroker::recover`] moves the leftovers back to the ready list
/// at the next start with the same worker id. A running worker also
/// recovers its own list once an unsettled job leaves it idle. Delivery is therefore
/// at-least-once; the Worker Task is idempotent per Item.
///
/// # Example
///
/// ```no_run
/// use snapshelf_shared::queue::{JobBroker, RedisBroker, ScrapeJob};
/// use snapshelf_shared::redis::{RedisClient, RedisConfig};
/// use uuid::Uuid;
///
/// # async fn example() -> anyhow::Result<()> {
/// let broker = RedisBroker::new(RedisClient::lazy(RedisConfig::from_env())?);
///
/// broker.enqueue(&ScrapeJob::new(Uuid::new_v4(), Uuid::new_v4(), "https://youtu.be/abc")).await?;
///
/// if let Some(reserved) = broker.reserve("worker-1").await? {
///     // ... process ...
///     broker.ack("worker-1", &reserved).await?;
/// }
/// # Ok(())
/// # }
/// ```

pub mod job;
pub mod memory;
pub mod redis_broker;

pub use job::{ReservedJob, ScrapeJob};
pub use memory::InMemoryBroker;
pub use redis_broker::{QueueKeys, RedisBroker};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Broker unreachable or timed out
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// Broker reachable but the command failed
    #[error("Queue command failed: {0}")]
    Command(String),

    #[error("Invalid job payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Producer/consumer hand-off
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Makes a job available immediately
    async fn enqueue(&self, job: &ScrapeJob) -> Result<(), QueueError>;

    /// Makes a job available after `delay`
    async fn schedule(&self, job: &ScrapeJob, delay: Duration) -> Result<(), QueueError>;

    /// Moves delayed jobs due at or before `now` to the ready list
    ///
    /// Safe to call from every worker concurrently; each job is moved once.
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError>;

    /// Claims the oldest ready job into `worker_id`'s processing list
    async fn reserve(&self, worker_id: &str) -> Result<Option<ReservedJob>, QueueError>;

    /// Removes a finished job from `worker_id`'s processing list
    async fn ack(&self, worker_id: &str, job: &ReservedJob) -> Result<(), QueueError>;

    /// Requeues everything left in `worker_id`'s processing list
    async fn recover(&self, worker_id: &str) -> Result<usize, QueueError>;

    /// Checks that the broker is reachable
    async fn ping(&self) -> Result<(), QueueError>;
}

/// Due time as a sorted-set score (Unix milliseconds)
pub(crate) fn due_score(now: DateTime<Utc>, delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis().saturating_add(delay_ms)
}
