//! # Snapshelf Shared Library
//!
//! Types and plumbing shared by the Snapshelf API server and the scrape worker.
//!
//! ## Module Organization
//!
//! - `db`: PostgreSQL pool and migrations
//! - `models`: Users, items and item attempt history
//! - `auth`: Password hashing, JWT and the axum auth middleware
//! - `redis`: Redis client wrapper
//! - `queue`: Job broker between the API (producer) and workers (consumers)
//! - `storage`: Object storage client for scraped images

pub mod auth;
pub mod db;
pub mod models;
pub mod queue;
pub mod redis;
pub mod storage;

/// Current version of the Snapshelf shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
