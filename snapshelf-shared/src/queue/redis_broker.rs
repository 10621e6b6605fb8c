/// Redis-backed [`JobBroker`]
///
/// Uses plain lists plus one sorted set, so it runs on any Redis version
/// and on managed Redis add-ons without module support.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::RedisError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{due_score, JobBroker, QueueError, ReservedJob, ScrapeJob};
use crate::redis::{RedisClient, RedisClientError};

/// Default key prefix
pub const DEFAULT_QUEUE_PREFIX: &str = "snapshelf:queue";

/// Delayed jobs promoted per `promote_due` call
const PROMOTE_BATCH: isize = 100;

/// Moves due members of the delayed set (KEYS[1]) onto the ready list
/// (KEYS[2]) in one atomic step, oldest first. ARGV: max score, batch size.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, payload in ipairs(due) do
    redis.call('ZREM', KEYS[1], payload)
    redis.call('LPUSH', KEYS[2], payload)
end
return #due
"#;

impl From<RedisError> for QueueError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            QueueError::Unavailable(err.to_string())
        } else {
            QueueError::Command(err.to_string())
        }
    }
}

impl From<RedisClientError> for QueueError {
    fn from(err: RedisClientError) -> Self {
        match err {
            RedisClientError::CommandError(msg) => QueueError::Command(msg),
            other => QueueError::Unavailable(other.to_string()),
        }
    }
}

/// Redis key layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    prefix: String,
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_PREFIX)
    }
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn ready(&self) -> String {
        format!("{}:ready", self.prefix)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    pub fn processing(&self, worker_id: &str) -> String {
        format!("{}:processing:{}", self.prefix, worker_id)
    }
}

/// Job broker over Redis lists
#[derive(Clone)]
pub struct RedisBroker {
    client: RedisClient,
    keys: QueueKeys,
}

impl RedisBroker {
    pub fn new(client: RedisClient) -> Self {
        Self::with_keys(client, QueueKeys::default())
    }

    pub fn with_keys(client: RedisClient, keys: QueueKeys) -> Self {
        Self { client, keys }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Runs one command against a fresh connection handle, bounded by the
    /// client's command timeout
    async fn run<T, F, Fut>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let conn = self.client.connection().await?;
        let timeout = self.client.config().command_timeout();

        match tokio::time::timeout(timeout, f(conn)).await {
            Ok(result) => result.map_err(QueueError::from),
            Err(_) => Err(QueueError::Unavailable("Redis command timed out".to_string())),
        }
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn enqueue(&self, job: &ScrapeJob) -> Result<(), QueueError> {
        let payload = job.to_json()?;
        let key = self.keys.ready();

        let _: i64 = self
            .run(|mut conn| async move {
                redis::cmd("LPUSH")
                    .arg(&key)
                    .arg(&payload)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        debug!(task_id = %job.task_id, item_id = %job.item_id, attempt = job.attempt, "Job enqueued");
        Ok(())
    }

    async fn schedule(&self, job: &ScrapeJob, delay: Duration) -> Result<(), QueueError> {
        let payload = job.to_json()?;
        let key = self.keys.delayed();
        let score = due_score(Utc::now(), delay);

        let _: i64 = self
            .run(|mut conn| async move {
                redis::cmd("ZADD")
                    .arg(&key)
                    .arg(score)
                    .arg(&payload)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        debug!(
            task_id = %job.task_id,
            attempt = job.attempt,
            delay_secs = delay.as_secs(),
            "Job scheduled"
        );
        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let delayed = self.keys.delayed();
        let ready = self.keys.ready();
        let max = now.timestamp_millis();

        let promoted: usize = self
            .run(|mut conn| async move {
                let script = redis::Script::new(PROMOTE_SCRIPT);
                script
                    .key(&delayed)
                    .key(&ready)
                    .arg(max)
                    .arg(PROMOTE_BATCH)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        if promoted > 0 {
            debug!(promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    async fn reserve(&self, worker_id: &str) -> Result<Option<ReservedJob>, QueueError> {
        let ready = self.keys.ready();
        let processing = self.keys.processing(worker_id);

        loop {
            let (src, dst) = (ready.clone(), processing.clone());
            let payload: Option<String> = self
                .run(|mut conn| async move {
                    redis::cmd("RPOPLPUSH")
                        .arg(&src)
                        .arg(&dst)
                        .query_async(&mut conn)
                        .await
                })
                .await?;

            let Some(payload) = payload else {
                return Ok(None);
            };

            match ScrapeJob::from_json(&payload) {
                Ok(job) => return Ok(Some(ReservedJob { job, payload })),
                Err(e) => {
                    // Drop unparseable payloads instead of redelivering them forever
                    warn!(error = %e, payload = %payload, "Discarding malformed job");
                    let key = processing.clone();
                    let _: i64 = self
                        .run(|mut conn| async move {
                            redis::cmd("LREM")
                                .arg(&key)
                                .arg(1)
                                .arg(&payload)
                                .query_async(&mut conn)
                                .await
                        })
                        .await?;
                }
            }
        }
    }

    async fn ack(&self, worker_id: &str, job: &ReservedJob) -> Result<(), QueueError> {
        let key = self.keys.processing(worker_id);
        let payload = job.payload.clone();

        let removed: i64 = self
            .run(|mut conn| async move {
                redis::cmd("LREM")
                    .arg(&key)
                    .arg(1)
                    .arg(&payload)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        if removed == 0 {
            warn!(task_id = %job.job.task_id, worker_id, "Acked job was not in the processing list");
        }
        Ok(())
    }

    async fn recover(&self, worker_id: &str) -> Result<usize, QueueError> {
        let processing = self.keys.processing(worker_id);
        let ready = self.keys.ready();
        let mut recovered = 0;

        loop {
            let (src, dst) = (processing.clone(), ready.clone());
            let moved: Option<String> = self
                .run(|mut conn| async move {
                    redis::cmd("RPOPLPUSH")
                        .arg(&src)
                        .arg(&dst)
                        .query_async(&mut conn)
                        .await
                })
                .await?;

            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(worker_id, recovered, "Recovered unacknowledged jobs");
        }
        Ok(recovered)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        match self.client.ping().await? {
            true => Ok(()),
            false => Err(QueueError::Unavailable("Unexpected PING response".to_string())),
        }
    }
}
