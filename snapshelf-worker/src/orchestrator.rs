/// Worker orchestrator
///
/// Runs the claim loop: promote due retries, reserve jobs up to the
/// concurrency limit, run each in its own Tokio task, and ack it once its
/// outcome is recorded.
///
/// # Architecture
///
/// ```text
/// WorkerOrchestrator
///   └─> generation loop
///         ├─> JobBroker::recover      (at start, and after an unsettled job)
///         ├─> JobBroker::promote_due
///         ├─> Semaphore         (WORKER_CONCURRENCY permits)
///         ├─> JobBroker::reserve
///         ├─> ScrapeTask::run   (spawned into a JoinSet)
///         └─> JobBroker::ack
/// ```
///
/// # Recycling
///
/// # Redelivery
///
/// A job whose task could not record any outcome stays in this worker's
/// processing list. The generation then stops claiming until its in-flight
/// tasks have finished and calls [`JobBroker::recover`], which moves the
/// list back to the ready queue. Recovering only with nothing in flight
/// keeps running jobs from being handed out twice.
///
/// After `max_tasks_per_child` claims a generation stops claiming, drains its
/// in-flight tasks and returns [`GenerationExit::Recycle`]. [`WorkerOrchestrator::run`]
/// then drops the generation's [`ScrapeTask`] (and with it the scraper's HTTP
/// session) and builds a fresh one.
///
/// # Shutdown
///
/// Cancelling the shutdown token stops claiming. In-flight tasks get the
/// grace period to finish; anything still running is aborted and its job is
/// left in the processing list for [`JobBroker::recover`].
///
/// # Example
///
/// ```no_run
/// use snapshelf_worker::config::WorkerSettings;
/// use snapshelf_worker::orchestrator::WorkerOrchestrator;
/// use snapshelf_worker::task::ScrapeTask;
/// use snapshelf_shared::queue::JobBroker;
/// use std::sync::Arc;
///
/// # async fn example(broker: Arc<dyn JobBroker>, build: impl FnMut() -> anyhow::Result<ScrapeTask>) -> anyhow::Result<()> {
/// let orchestrator = WorkerOrchestrator::new(broker, WorkerSettings::load()?);
///
/// let shutdown = orchestrator.shutdown_token();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.cancel();
/// });
///
/// orchestrator.run(build).await?;
/// # Ok(())
/// # }
/// ```

use chrono::Utc;
use snapshelf_shared::queue::{JobBroker, ReservedJob};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::task::{ScrapeTask, TaskOutcome};

/// Why a generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationExit {
    Recycle,
    Shutdown,
}

/// Totals for one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub claimed: usize,
    pub acked: usize,
    /// Tasks that could not record an outcome, left unacked
    pub unsettled: usize,
}

pub struct WorkerOrchestrator {
    broker: Arc<dyn JobBroker>,
    settings: WorkerSettings,
    shutdown_token: CancellationToken,
}

impl WorkerOrchestrator {
    pub fn new(broker: Arc<dyn JobBroker>, settings: WorkerSettings) -> Self {
        WorkerOrchestrator {
            broker,
            settings,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Gets shutdown token
    ///
    /// Used to signal graceful shutdown from external handlers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Runs generations until shutdown
    ///
    /// `build_task` is called once per generation.
    pub async fn run<F>(&self, mut build_task: F) -> anyhow::Result<()>
    where
        F: FnMut() -> anyhow::Result<ScrapeTask>,
    {
        info!(
            worker_id = %self.settings.id,
            concurrency = self.settings.concurrency,
            max_tasks_per_child = self.settings.max_tasks_per_child,
            "Worker orchestrator starting"
        );

        let mut generation = 0u64;
        loop {
            generation += 1;
            let task = Arc::new(build_task()?);
            debug!(generation, "Starting worker generation");

            let (exit, stats) = self.run_generation(task).await;
            info!(
                generation,
                claimed = stats.claimed,
                acked = stats.acked,
                unsettled = stats.unsettled,
                exit = ?exit,
                "Worker generation finished"
            );

            if exit == GenerationExit::Shutdown {
                break;
            }
            info!(generation, "Recycling scraper");
        }

        info!("Worker orchestrator shut down");
        Ok(())
    }

    /// Claims and runs jobs until the recycle limit or shutdown
    pub async fn run_generation(&self, task: Arc<ScrapeTask>) -> (GenerationExit, GenerationStats) {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut in_flight: JoinSet<bool> = JoinSet::new();
        let mut stats = GenerationStats::default();
        let limit = self.settings.max_tasks_per_child;
        // Jobs left by an earlier generation or a crashed process
        let mut needs_recovery = true;

        let exit = loop {
            if self.shutdown_token.is_cancelled() {
                break GenerationExit::Shutdown;
            }

            while let Some(joined) = in_flight.try_join_next() {
                if !record_join(joined, &mut stats) {
                    needs_recovery = true;
                }
            }

            if needs_recovery {
                if !in_flight.is_empty() {
                    tokio::select! {
                        Some(joined) = in_flight.join_next() => {
                            record_join(joined, &mut stats);
                        }
                        _ = self.shutdown_token.cancelled() => {}
                    }
                    continue;
                }
                if !self.recover().await {
                    self.idle().await;
                    continue;
                }
                needs_recovery = false;
            }

            if limit > 0 && stats.claimed >= limit {
                break GenerationExit::Recycle;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break GenerationExit::Shutdown,
                },
                _ = self.shutdown_token.cancelled() => break GenerationExit::Shutdown,
            };

            if let Err(e) = self.broker.promote_due(Utc::now()).await {
                warn!(error = %e, "Failed to promote delayed jobs");
            }

            let reserved = match self.broker.reserve(&self.settings.id).await {
                Ok(Some(reserved)) => reserved,
                Ok(None) => {
                    drop(permit);
                    self.idle().await;
                    continue;
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "Failed to reserve job");
                    self.idle().await;
                    continue;
                }
            };

            stats.claimed += 1;
            debug!(
                task_id = %reserved.job.task_id,
                item_id = %reserved.job.item_id,
                attempt = reserved.job.attempt,
                "Claimed job"
            );

            let task = task.clone();
            let broker = self.broker.clone();
            let worker_id = self.settings.id.clone();
            in_flight.spawn(async move {
                let acked = execute_job(&task, broker.as_ref(), &worker_id, &reserved).await;
                drop(permit);
                acked
            });
        };

        self.drain(&mut in_flight, exit, &mut stats).await;
        (exit, stats)
    }

    /// Waits for in-flight tasks; on shutdown only up to the grace period
    async fn drain(&self, in_flight: &mut JoinSet<bool>, exit: GenerationExit, stats: &mut GenerationStats) {
        if in_flight.is_empty() {
            return;
        }
        info!(in_flight = in_flight.len(), exit = ?exit, "Waiting for in-flight tasks");

        let deadline = match exit {
            GenerationExit::Shutdown => Some(Instant::now() + self.settings.shutdown_grace()),
            GenerationExit::Recycle => None,
        };

        loop {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(
                            count = in_flight.len(),
                            "Grace period expired, aborting tasks; their jobs stay in the processing list"
                        );
                        in_flight.abort_all();
                        while in_flight.join_next().await.is_some() {
                            stats.unsettled += 1;
                        }
                        return;
                    }
                },
                None => in_flight.join_next().await,
            };

            match joined {
                Some(result) => {
                    record_join(result, stats);
                }
                None => return,
            }
        }
    }

    /// Requeues this worker's processing list; `false` if the broker failed
    async fn recover(&self) -> bool {
        match self.broker.recover(&self.settings.id).await {
            Ok(0) => true,
            Ok(recovered) => {
                info!(recovered, "Requeued unacknowledged jobs");
                true
            }
            Err(e) => {
                warn!(error = %e, "Could not recover processing list");
                false
            }
        }
    }

    async fn idle(&self) {
        tokio::select! {
            _ = sleep(self.settings.poll_interval()) => {}
            _ = self.shutdown_token.cancelled() => {}
        }
    }
}

/// Counts a finished task; `false` if its job was left unacknowledged
fn record_join(joined: Result<bool, tokio::task::JoinError>, stats: &mut GenerationStats) -> bool {
    match joined {
        Ok(true) => {
            stats.acked += 1;
            true
        }
        Ok(false) => {
            stats.unsettled += 1;
            false
        }
        Err(e) => {
            error!(error = %e, "Task panicked or was aborted");
            stats.unsettled += 1;
            false
        }
    }
}

/// Runs one job and acks it once settled; returns whether it was acked
async fn execute_job(task: &ScrapeTask, broker: &dyn JobBroker, worker_id: &str, reserved: &ReservedJob) -> bool {
    let job = &reserved.job;

    match task.run(job).await {
        Ok(outcome) => {
            if let TaskOutcome::Skipped(reason) = &outcome {
                debug!(task_id = %job.task_id, reason = ?reason, "Job skipped");
            }
            match broker.ack(worker_id, reserved).await {
                Ok(()) => true,
                Err(e) => {
                    error!(task_id = %job.task_id, error = %e, "Failed to ack job");
                    false
                }
            }
        }
        Err(e) => {
            error!(
                task_id = %job.task_id,
                item_id = %job.item_id,
                error = %e,
                "Could not record task outcome, leaving job unacknowledged"
            );
            false
        }
    }
}
