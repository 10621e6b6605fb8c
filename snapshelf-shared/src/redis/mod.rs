/// Redis integration
///
/// Redis backs the job queue (see [`crate::queue`]). This module only owns
/// the connection: configuration, lazy connect, health checks.
///
/// # Example
///
/// ```no_run
/// use snapshelf_shared::redis::{RedisClient, RedisConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = RedisClient::lazy(RedisConfig::from_env())?;
/// println!("Redis healthy: {}", client.ping().await.unwrap_or(false));
/// # Ok(())
/// # }
/// ```

pub mod client;

pub use client::{RedisClient, RedisClientError, RedisConfig};
