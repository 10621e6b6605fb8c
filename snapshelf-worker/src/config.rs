/// Worker tuning settings
///
/// Loaded with the `config` crate from `WORKER_*` environment variables
/// (and `.env`), on top of built-in defaults:
///
/// | Variable | Field | Default |
/// |---|---|---|
/// | `WORKER_ID` | `id` | `worker-{HOSTNAME}` or `worker-local` |
/// | `WORKER_CONCURRENCY` | `concurrency` | 2 |
/// | `WORKER_MAX_TASKS_PER_CHILD` | `max_tasks_per_child` | 5 (0 disables recycling) |
/// | `WORKER_MAX_RETRIES` | `max_retries` | 2 |
/// | `WORKER_RETRY_DELAY_SECS` | `retry_delay_secs` | 90 |
/// | `WORKER_RETRY_MAX_DELAY_SECS` | `retry_max_delay_secs` | 900 |
/// | `WORKER_SOFT_TIME_LIMIT_SECS` | `soft_time_limit_secs` | 45 |
/// | `WORKER_TIME_LIMIT_SECS` | `time_limit_secs` | 60 |
/// | `WORKER_POLL_INTERVAL_MS` | `poll_interval_ms` | 500 |
/// | `WORKER_SHUTDOWN_GRACE_SECS` | `shutdown_grace_secs` | 30 |
///
/// # Example
///
/// ```no_run
/// use snapshelf_worker::config::WorkerSettings;
///
/// # fn example() -> anyhow::Result<()> {
/// let settings = WorkerSettings::load()?;
/// println!("{} runs {} tasks at once", settings.id, settings.concurrency);
/// # Ok(())
/// # }
/// ```

use anyhow::Context;
use config::{Config, Environment, Map};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::timeout::TimeLimits;

const ENV_PREFIX: &str = "WORKER";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerSettings {
    /// Names this worker's processing list; must be stable across restarts
    pub id: String,

    pub concurrency: usize,

    /// Tasks claimed before the scraper is rebuilt
    pub max_tasks_per_child: usize,

    pub max_retries: u32,

    pub retry_delay_secs: u64,

    pub retry_max_delay_secs: u64,

    pub soft_time_limit_secs: u64,

    pub time_limit_secs: u64,

    pub poll_interval_ms: u64,

    pub shutdown_grace_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            id: default_worker_id(),
            concurrency: 2,
            max_tasks_per_child: 5,
            max_retries: 2,
            retry_delay_secs: 90,
            retry_max_delay_secs: 900,
            soft_time_limit_secs: 45,
            time_limit_secs: 60,
            poll_interval_ms: 500,
            shutdown_grace_secs: 30,
        }
    }
}

fn default_worker_id() -> String {
    match env::var("HOSTNAME") {
        Ok(host) if !host.trim().is_empty() => format!("worker-{}", host.trim()),
        _ => "worker-local".to_string(),
    }
}

impl WorkerSettings {
    /// Loads settings from the process environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(None)
    }

    /// Loads settings from an explicit variable map instead of the process
    /// environment (`None` reads the real environment)
    pub fn from_source(vars: Option<Map<String, String>>) -> anyhow::Result<Self> {
        let defaults = WorkerSettings::default();

        let settings: WorkerSettings = Config::builder()
            .set_default("id", defaults.id)?
            .set_default("concurrency", defaults.concurrency as u64)?
            .set_default("max_tasks_per_child", defaults.max_tasks_per_child as u64)?
            .set_default("max_retries", defaults.max_retries as u64)?
            .set_default("retry_delay_secs", defaults.retry_delay_secs)?
            .set_default("retry_max_delay_secs", defaults.retry_max_delay_secs)?
            .set_default("soft_time_limit_secs", defaults.soft_time_limit_secs)?
            .set_default("time_limit_secs", defaults.time_limit_secs)?
            .set_default("poll_interval_ms", defaults.poll_interval_ms)?
            .set_default("shutdown_grace_secs", defaults.shutdown_grace_secs)?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .context("Failed to read worker settings")?
            .try_deserialize()
            .context("Invalid worker settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("WORKER_ID must not be empty");
        }
        if self.concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be at least 1");
        }
        if self.time_limit_secs == 0 {
            anyhow::bail!("WORKER_TIME_LIMIT_SECS must be at least 1");
        }
        if self.soft_time_limit_secs > self.time_limit_secs {
            anyhow::bail!(
                "WORKER_SOFT_TIME_LIMIT_SECS ({}) exceeds WORKER_TIME_LIMIT_SECS ({})",
                self.soft_time_limit_secs,
                self.time_limit_secs
            );
        }
        if self.retry_delay_secs > self.retry_max_delay_secs {
            anyhow::bail!("WORKER_RETRY_DELAY_SECS exceeds WORKER_RETRY_MAX_DELAY_SECS");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_delay_secs),
            Duration::from_secs(self.retry_max_delay_secs),
        )
    }

    pub fn time_limits(&self) -> TimeLimits {
        TimeLimits::new(
            Duration::from_secs(self.soft_time_limit_secs),
            Duration::from_secs(self.time_limit_secs),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
