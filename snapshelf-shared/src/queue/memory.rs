/// In-process [`JobBroker`] for tests and single-process development
///
/// Mirrors the Redis list semantics: FIFO ready queue, per-worker processing
/// lists, and a delayed set keyed by due time. [`InMemoryBroker::set_available`]
/// simulates an outage; every operation then fails with
/// [`QueueError::Unavailable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{due_score, JobBroker, QueueError, ReservedJob, ScrapeJob};

#[derive(Default)]
struct State {
    /// Front is the oldest job
    ready: VecDeque<String>,
    /// (due millis, payload)
    delayed: Vec<(i64, String)>,
    processing: HashMap<String, Vec<String>>,
}

pub struct InMemoryBroker {
    state: Mutex<State>,
    available: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggles simulated reachability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Jobs waiting in the ready queue, oldest first
    pub fn ready_jobs(&self) -> Vec<ScrapeJob> {
        self.lock()
            .ready
            .iter()
            .filter_map(|p| ScrapeJob::from_json(p).ok())
            .collect()
    }

    /// Delayed jobs with their due time, soonest first
    pub fn delayed_jobs(&self) -> Vec<(DateTime<Utc>, ScrapeJob)> {
        let mut delayed: Vec<(i64, String)> = self.lock().delayed.clone();
        delayed.sort_by_key(|(due, _)| *due);
        delayed
            .into_iter()
            .filter_map(|(due, p)| {
                let at = DateTime::<Utc>::from_timestamp_millis(due)?;
                Some((at, ScrapeJob::from_json(&p).ok()?))
            })
            .collect()
    }

    pub fn processing_len(&self, worker_id: &str) -> usize {
        self.lock().processing.get(worker_id).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("in-memory broker marked unavailable".to_string()))
        }
    }
}

#[async_trait]
impl JobBroker for InMemoryBroker {
    async fn enqueue(&self, job: &ScrapeJob) -> Result<(), QueueError> {
        self.check()?;
        let payload = job.to_json()?;
        self.lock().ready.push_back(payload);
        Ok(())
    }

    async fn schedule(&self, job: &ScrapeJob, delay: Duration) -> Result<(), QueueError> {
        self.check()?;
        let payload = job.to_json()?;
        self.lock().delayed.push((due_score(Utc::now(), delay), payload));
        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        self.check()?;
        let max = now.timestamp_millis();
        let mut state = self.lock();

        let (mut due, later): (Vec<_>, Vec<_>) =
            state.delayed.drain(..).partition(|(score, _)| *score <= max);
        state.delayed = later;
        due.sort_by_key(|(score, _)| *score);

        let promoted = due.len();
        state.ready.extend(due.into_iter().map(|(_, payload)| payload));
        Ok(promoted)
    }

    async fn reserve(&self, worker_id: &str) -> Result<Option<ReservedJob>, QueueError> {
        self.check()?;
        let mut state = self.lock();

        while let Some(payload) = state.ready.pop_front() {
            match ScrapeJob::from_json(&payload) {
                Ok(job) => {
                    state
                        .processing
                        .entry(worker_id.to_string())
                        .or_default()
                        .push(payload.clone());
                    return Ok(Some(ReservedJob { job, payload }));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding malformed job");
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, worker_id: &str, job: &ReservedJob) -> Result<(), QueueError> {
        self.check()?;
        let mut state = self.lock();

        if let Some(list) = state.processing.get_mut(worker_id) {
            if let Some(pos) = list.iter().position(|p| p == &job.payload) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn recover(&self, worker_id: &str) -> Result<usize, QueueError> {
        self.check()?;
        let mut state = self.lock();

        let leftovers = state.processing.remove(worker_id).unwrap_or_default();
        let recovered = leftovers.len();
        state.ready.extend(leftovers);
        Ok(recovered)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> ScrapeJob {
        ScrapeJob::new(Uuid::new_v4(), Uuid::new_v4(), "https://www.tiktok.com/@a/video/1")
    }

    #[tokio::test]
    async fn test_fifo_reserve_and_ack() {
        let broker = InMemoryBroker::new();
        let (first, second) = (job(), job());

        broker.enqueue(&first).await.unwrap();
        broker.enqueue(&second).await.unwrap();

        let reserved = broker.reserve("w1").await.unwrap().unwrap();
        assert_eq!(reserved.job, first);
        assert_eq!(broker.processing_len("w1"), 1);

        broker.ack("w1", &reserved).await.unwrap();
        assert_eq!(broker.processing_len("w1"), 0);

        assert_eq!(broker.reserve("w1").await.unwrap().unwrap().job, second);
        assert!(broker.reserve("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_requeues_unacked() {
        let broker = InMemoryBroker::new();
        let j = job();

        broker.enqueue(&j).await.unwrap();
        broker.reserve("w1").await.unwrap().unwrap();

        assert_eq!(broker.recover("w2").await.unwrap(), 0);
        assert_eq!(broker.recover("w1").await.unwrap(), 1);
        assert_eq!(broker.ready_jobs(), vec![j]);
    }

    #[tokio::test]
    async fn test_promote_due_respects_due_time() {
        let broker = InMemoryBroker::new();
        let soon = job();
        let late = job();

        broker.schedule(&soon, Duration::from_secs(10)).await.unwrap();
        broker.schedule(&late, Duration::from_secs(100)).await.unwrap();

        assert_eq!(broker.promote_due(Utc::now()).await.unwrap(), 0);

        let in_a_minute = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(broker.promote_due(in_a_minute).await.unwrap(), 1);
        assert_eq!(broker.ready_jobs(), vec![soon]);
        assert_eq!(broker.delayed_jobs().len(), 1);
        assert_eq!(broker.delayed_jobs()[0].1, late);
    }

    #[tokio::test]
    async fn test_unavailable_broker_fails_everything() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);

        assert!(matches!(broker.ping().await, Err(QueueError::Unavailable(_))));
        assert!(matches!(broker.enqueue(&job()).await, Err(QueueError::Unavailable(_))));
        assert!(broker.reserve("w1").await.is_err());

        broker.set_available(true);
        assert!(broker.ping().await.is_ok());
    }
}
