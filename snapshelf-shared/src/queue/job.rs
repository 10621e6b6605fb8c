/// Job payload passed from the API to the worker
///
/// Jobs are serialized as JSON. The exact serialized string is what sits in
/// Redis, so it doubles as the job's identity for `LREM`/`ZREM`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One request to scrape a URL into an Item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeJob {
    /// Attempt identity; matches `items.task_id` while the job is current
    pub task_id: Uuid,

    /// Item to fill in
    pub item_id: Uuid,

    /// Submitted URL
    pub source_url: String,

    /// 1-based delivery number within `task_id`
    pub attempt: u32,

    /// When this delivery was enqueued or scheduled
    pub enqueued_at: DateTime<Utc>,
}

impl ScrapeJob {
    /// First delivery of a new task
    pub fn new(task_id: Uuid, item_id: Uuid, source_url: impl Into<String>) -> Self {
        Self {
            task_id,
            item_id,
            source_url: source_url.into(),
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// The redelivery scheduled after a transient failure
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// A job claimed by a worker, with the raw payload needed to ack it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    pub job: ScrapeJob,
    pub payload: String,
}
