/// Application state and router builder
///
/// This module defines the shared application state and builds the Axum
/// router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use snapshelf_api::{app::{build_router, AppState}, config::Config};
/// use snapshelf_shared::db::pool::create_pool;
/// use snapshelf_shared::queue::RedisBroker;
/// use snapshelf_shared::redis::RedisClient;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = create_pool(config.database.clone()).await?;
/// let broker = Arc::new(RedisBroker::new(RedisClient::lazy(config.redis.clone())?));
/// let state = AppState::new(pool, broker, None, config);
/// let app = build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, middleware::security::SecurityHeadersLayer};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use snapshelf_shared::auth::middleware::authenticate_bearer;
use snapshelf_shared::queue::JobBroker;
use snapshelf_shared::storage::MediaStorage;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Queue the scrape jobs go to
    pub broker: Arc<dyn JobBroker>,

    /// Object storage, when configured; used to delete stored images
    pub storage: Option<MediaStorage>,

    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: PgPool, broker: Arc<dyn JobBroker>, storage: Option<MediaStorage>, config: Config) -> Self {
        Self {
            db,
            broker,
            storage,
            config: Arc::new(config),
        }
    }

    /// Gets JWT secret for token operations
    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET /                          # Welcome (public)
/// ├── GET /health                    # DB + queue health (public)
/// └── /v1/
///     ├── /auth/
///     │   ├── POST /register         # public
///     │   ├── POST /token            # OAuth2 password form, public
///     │   └── GET  /me               # JWT
///     ├── POST /submit_url           # JWT
///     ├── /items/                    # JWT
///     │   ├── GET    /
///     │   ├── GET    /:id
///     │   ├── PATCH  /:id
///     │   ├── DELETE /:id
///     │   ├── GET    /:id/status
///     │   ├── GET    /:id/attempts
///     │   ├── GET    /:id/events     # SSE
///     │   └── POST   /:id/retry
///     └── GET /task_status/:task_id  # JWT
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Logging (tower-http TraceLayer)
/// 4. Authentication (per-route basis)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let public_routes = Router::new()
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/token", post(routes::auth::token));

    let protected_routes = Router::new()
        .route("/auth/me", get(routes::auth::me))
        .route("/submit_url", post(routes::submit::submit_url))
        .route("/items", get(routes::items::list_items))
        .route(
            "/items/:id",
            get(routes::items::get_item)
                .patch(routes::items::update_item)
                .delete(routes::items::delete_item),
        )
        .route("/items/:id/status", get(routes::items::item_status))
        .route("/items/:id/attempts", get(routes::items::item_attempts))
        .route("/items/:id/events", get(routes::events::item_events))
        .route("/items/:id/retry", post(routes::items::retry_item))
        .route("/task_status/:task_id", get(routes::tasks::task_status))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .merge(protected_routes);

    let cors = if state.config.api.allows_any_origin() {
        // Development mode: permissive CORS
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(public_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

/// JWT authentication middleware layer
///
/// Validates the bearer token and injects `AuthContext` into request
/// extensions.
async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, crate::error::ApiError> {
    let auth_context = authenticate_bearer(req.headers(), state.jwt_secret())?;
    req.extensions_mut().insert(auth_context);

    Ok(next.run(req).await)
}
