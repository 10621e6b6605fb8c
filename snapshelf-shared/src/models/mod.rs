/// Database models for Snapshelf
///
/// Each model is a plain struct with an `impl` block of async sqlx queries.
///
/// # Models
///
/// - `user`: Accounts
/// - `item`: Submitted URLs and their scrape results
/// - `item_attempt`: Per-run history of the Worker Task
///
/// # Example
///
/// ```no_run
/// use snapshelf_shared::models::user::{User, CreateUser};
/// use snapshelf_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::from_env()?).await?;
///
/// let user = User::create(&pool, CreateUser {
///     username: "shelfie".to_string(),
///     password_hash: "$argon2id$...".to_string(),
/// }).await?;
/// # Ok(())
/// # }
/// ```

pub mod item;
pub mod item_attempt;
pub mod user;
