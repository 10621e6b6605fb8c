/// Authentication utilities
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and registration rules
/// - [`jwt`]: HS256 access tokens
/// - [`middleware`]: Axum bearer-token middleware and the `AuthContext` extractor
///
/// # Example
///
/// ```no_run
/// use snapshelf_shared::auth::password::{hash_password, verify_password};
/// use snapshelf_shared::auth::jwt::{create_token, Claims};
/// use chrono::Duration;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("shelf4life")?;
/// assert!(verify_password("shelf4life", &hash)?);
///
/// let claims = Claims::new(Uuid::new_v4(), "shelfie", Duration::minutes(1000));
/// let token = create_token(&claims, "a-secret-key-that-is-at-least-32-bytes")?;
/// # Ok(())
/// # }
/// ```

pub mod jwt;
pub mod middleware;
pub mod password;
