/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Welcome and health check endpoints
/// - `auth`: Registration, token issue and the current user
/// - `submit`: URL submission
/// - `items`: Item browsing, editing, status and retry
/// - `events`: Server-Sent Events status channel
/// - `tasks`: Task status lookup by task id

pub mod auth;
pub mod events;
pub mod health;
pub mod items;
pub mod submit;
pub mod tasks;
