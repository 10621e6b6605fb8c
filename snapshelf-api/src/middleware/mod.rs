/// Middleware for the API server
///
/// - `security`: Security response headers (HSTS in production)

pub mod security;
