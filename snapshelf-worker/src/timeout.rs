/// Soft and hard time limits for a task run
///
/// # Behavior
///
/// 1. **Soft limit** (default 45 s): a warning is logged, the run continues
/// 2. **Hard limit** (default 60 s): the run's future is dropped and
///    [`TimeLimitExceeded`] is returned
///
/// Dropping the future cancels any in-flight HTTP request or upload at its
/// next await point. Guarded status writes keep a cancelled run from leaving
/// partial state behind.
///
/// # Example
///
/// ```no_run
/// use snapshelf_worker::timeout::TimeLimits;
/// use std::time::Duration;
/// use uuid::Uuid;
///
/// # async fn example() {
/// let limits = TimeLimits::new(Duration::from_secs(45), Duration::from_secs(60));
///
/// match limits.run(Uuid::new_v4(), async { 42 }).await {
///     Ok(value) => assert_eq!(value, 42),
///     Err(e) => eprintln!("{}", e),
/// }
/// # }
/// ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Default soft limit (45 seconds)
pub const DEFAULT_SOFT_LIMIT: Duration = Duration::from_secs(45);

/// Default hard limit (60 seconds)
pub const DEFAULT_HARD_LIMIT: Duration = Duration::from_secs(60);

/// Minimum allowed hard limit (1 second)
pub const MIN_LIMIT: Duration = Duration::from_secs(1);

/// The run hit its hard limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Task exceeded its time limit of {}s", .0.as_secs())]
pub struct TimeLimitExceeded(pub Duration);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimits {
    soft: Duration,
    hard: Duration,
}

impl Default for TimeLimits {
    fn default() -> Self {
        TimeLimits::new(DEFAULT_SOFT_LIMIT, DEFAULT_HARD_LIMIT)
    }
}

impl TimeLimits {
    /// Creates limits, clamping the hard limit to at least [`MIN_LIMIT`] and
    /// the soft limit to at most the hard one
    pub fn new(soft: Duration, hard: Duration) -> Self {
        let hard = hard.max(MIN_LIMIT);
        TimeLimits {
            soft: soft.min(hard),
            hard,
        }
    }

    pub fn soft(&self) -> Duration {
        self.soft
    }

    pub fn hard(&self) -> Duration {
        self.hard
    }

    /// Runs `fut` under both limits
    pub async fn run<F, T>(&self, task_id: Uuid, fut: F) -> Result<T, TimeLimitExceeded>
    where
        F: Future<Output = T>,
    {
        let soft = sleep(self.soft);
        let hard = sleep(self.hard);
        tokio::pin!(fut, soft, hard);

        let mut warned = false;
        loop {
            tokio::select! {
                biased;

                output = &mut fut => return Ok(output),
                _ = &mut hard => {
                    tracing::warn!(
                        task_id = %task_id,
                        limit_secs = self.hard.as_secs(),
                        "Hard time limit reached, aborting task"
                    );
                    return Err(TimeLimitExceeded(self.hard));
                }
                _ = &mut soft, if !warned => {
                    warned = true;
                    tracing::warn!(
                        task_id = %task_id,
                        limit_secs = self.soft.as_secs(),
                        "Soft time limit exceeded, task still running"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = TimeLimits::default();
        assert_eq!(limits.soft(), Duration::from_secs(45));
        assert_eq!(limits.hard(), Duration::from_secs(60));
    }

    #[test]
    fn test_clamping() {
        let limits = TimeLimits::new(Duration::from_secs(90), Duration::from_secs(60));
        assert_eq!(limits.soft(), Duration::from_secs(60));

        let limits = TimeLimits::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(limits.hard(), MIN_LIMIT);
        assert_eq!(limits.soft(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_within_limits() {
        let limits = TimeLimits::default();
        let result = limits
            .run(Uuid::new_v4(), async {
                sleep(Duration::from_secs(10)).await;
                "done"
            })
            .await;
        assert_eq!(result, Ok("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_soft_limit_still_completes() {
        let limits = TimeLimits::new(Duration::from_secs(5), Duration::from_secs(20));
        let result = limits
            .run(Uuid::new_v4(), async {
                sleep(Duration::from_secs(10)).await;
                7
            })
            .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_limit_aborts() {
        let limits = TimeLimits::new(Duration::from_secs(5), Duration::from_secs(20));
        let started = tokio::time::Instant::now();

        let result = limits
            .run(Uuid::new_v4(), async {
                sleep(Duration::from_secs(3600)).await;
            })
            .await;

        assert_eq!(result, Err(TimeLimitExceeded(Duration::from_secs(20))));
        assert!(started.elapsed() >= Duration::from_secs(20));
    }
}
