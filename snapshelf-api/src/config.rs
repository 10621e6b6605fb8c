/// Configuration management for the API server
///
/// Loads configuration from environment variables (and `.env` when present)
/// into a type-safe struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `REDIS_URL` / `REDISCLOUD_URL`: Queue broker (default: redis://localhost:6379/0)
/// - `SECRET_KEY` (or `JWT_SECRET`): JWT signing key, at least 32 characters (required)
/// - `ACCESS_TOKEN_EXPIRE_MINUTES`: Token lifetime (default: 1000)
/// - `API_HOST` / `API_PORT`: Bind address (default: 0.0.0.0:8080)
/// - `CORS_ORIGINS`: Comma-separated allowed origins, `*` for any (default: *)
/// - `ENVIRONMENT`: `production` enables HSTS (default: development)
/// - `R2_*`: Object storage, optional; used to delete stored images
///
/// # Example
///
/// ```no_run
/// use snapshelf_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use snapshelf_shared::db::pool::DatabaseConfig;
use snapshelf_shared::redis::RedisConfig;
use snapshelf_shared::storage::StorageConfig;
use std::env;
use std::fmt;

/// Shortest accepted signing key
pub const MIN_SECRET_LENGTH: usize = 32;

/// Default token lifetime in minutes
pub const DEFAULT_TOKEN_EXPIRE_MINUTES: i64 = 1000;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,

    /// Present when `R2_BUCKET_NAME` is set
    pub storage: Option<StorageConfig>,
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `["*"]` allows any
    pub cors_origins: Vec<String>,

    /// Production mode (enables HSTS)
    pub production: bool,
}

/// Token signing settings
#[derive(Clone, PartialEq, Eq)]
pub struct JwtConfig {
    /// HS256 signing key
    ///
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,

    /// Access token lifetime in minutes
    pub expire_minutes: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("expire_minutes", &self.expire_minutes)
            .finish()
    }
}

impl ApiConfig {
    fn from_lookup(var: &impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = var("API_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .map_err(|e| anyhow::anyhow!("API_PORT is not a valid port: {}", e))?;

        let cors_origins = parse_origins(&var("CORS_ORIGINS").unwrap_or_else(|| "*".to_string()));

        let production = var("ENVIRONMENT")
            .map(|e| e.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        Ok(Self {
            host,
            port,
            cors_origins,
            production,
        })
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

impl JwtConfig {
    fn from_lookup(var: &impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let secret = var("SECRET_KEY")
            .or_else(|| var("JWT_SECRET"))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("SECRET_KEY environment variable is required"))?;

        if secret.len() < MIN_SECRET_LENGTH {
            anyhow::bail!("SECRET_KEY must be at least {} characters long", MIN_SECRET_LENGTH);
        }

        let expire_minutes = match var("ACCESS_TOKEN_EXPIRE_MINUTES") {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|e| anyhow::anyhow!("ACCESS_TOKEN_EXPIRE_MINUTES is not a number: {}", e))?,
            None => DEFAULT_TOKEN_EXPIRE_MINUTES,
        };
        if expire_minutes <= 0 {
            anyhow::bail!("ACCESS_TOKEN_EXPIRE_MINUTES must be positive");
        }

        Ok(Self {
            secret,
            expire_minutes,
        })
    }

    pub fn expires_in_seconds(&self) -> i64 {
        self.expire_minutes * 60
    }
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DATABASE_URL` or `SECRET_KEY` is missing
    /// - A numeric variable does not parse
    /// - The signing key is shorter than 32 characters
    /// - Storage is partially configured
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let var = |name: &str| env::var(name).ok();

        Ok(Self {
            api: ApiConfig::from_lookup(&var)?,
            database: DatabaseConfig::from_env()?,
            redis: RedisConfig::from_env(),
            jwt: JwtConfig::from_lookup(&var)?,
            storage: StorageConfig::from_env_optional()?,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
