//! # Snapshelf Worker Library
//!
//! Consumes scrape jobs from the queue and turns submitted URLs into stored
//! images and finished items.
//!
//! ## Modules
//!
//! - `config`: `WORKER_*` tuning settings
//! - `scraper`: Platform detection, page fetching and parsing
//! - `repository`: Item persistence seam (PostgreSQL and in-memory)
//! - `retry`: Retry budget and exponential backoff
//! - `timeout`: Soft and hard time limits per run
//! - `task`: The Worker Task for one job
//! - `orchestrator`: Claim loop, concurrency limit and recycling
//!
//! ## Example
//!
//! ```no_run
//! use snapshelf_worker::scraper::{HttpFetcher, Scraper};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let scraper = Scraper::new(Arc::new(HttpFetcher::new()?));
//! let post = scraper.scrape("https://youtu.be/abc").await?;
//! println!("{:?}", post.image_url);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod orchestrator;
pub mod repository;
pub mod retry;
pub mod scraper;
pub mod task;
pub mod timeout;

/// Current version of the worker
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
