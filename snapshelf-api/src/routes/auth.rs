/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /v1/auth/register` - Register a new user (JSON)
/// - `POST /v1/auth/token` - OAuth2 password grant (form-encoded)
/// - `GET /v1/auth/me` - The authenticated user
///
/// Tokens are HS256 JWTs valid for `ACCESS_TOKEN_EXPIRE_MINUTES`.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::StatusCode, Form, Json};
use serde::{Deserialize, Serialize};
use snapshelf_shared::{
    auth::{jwt, middleware::AuthContext, password},
    models::user::{validate_username, CreateUser, User},
};
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be between 3 and 50 characters"))]
    pub username: String,

    /// Checked for strength before hashing
    #[validate(length(min = 8, max = 128, message = "Password must be between 8 and 128 characters"))]
    pub password: String,
}

/// OAuth2 password grant form
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub username: String,
    pub password: String,

    /// Must be `password` when present
    #[serde(default)]
    pub grant_type: Option<String>,
}

/// Issued access token
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Always `bearer`
    pub token_type: String,

    /// Lifetime in seconds
    pub expires_in: i64,
}

/// Register response
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,

    #[serde(flatten)]
    pub token: TokenResponse,
}

/// Register a new user
///
/// # Endpoint
///
/// ```text
/// POST /v1/auth/register
/// Content-Type: application/json
///
/// { "username": "shelfie", "password": "shelf4life" }
/// ```
///
/// # Response (201)
///
/// ```json
/// {
///   "user": { "id": "uuid", "username": "shelfie", ... },
///   "access_token": "eyJ...",
///   "token_type": "bearer",
///   "expires_in": 60000
/// }
/// ```
///
/// # Errors
///
/// - `409 Conflict`: Username already registered
/// - `422 Unprocessable Entity`: Validation failed
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    req.validate()?;

    validate_username(&req.username).map_err(|e| ApiError::invalid("username", e))?;
    password::validate_password_strength(&req.password).map_err(|e| ApiError::invalid("password", e))?;

    let password_hash = password::hash_password(&req.password)?;

    let user = User::create(
        &state.db,
        CreateUser {
            username: req.username,
            password_hash,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    let token = issue_token(&state, &user)?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user, token })))
}

/// OAuth2 password grant
///
/// # Endpoint
///
/// ```text
/// POST /v1/auth/token
/// Content-Type: application/x-www-form-urlencoded
///
/// grant_type=password&username=shelfie&password=shelf4life
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Unsupported `grant_type`
/// - `401 Unauthorized`: Incorrect username or password
pub async fn token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> ApiResult<Json<TokenResponse>> {
    if let Some(grant_type) = form.grant_type.as_deref() {
        if grant_type != "password" {
            return Err(ApiError::BadRequest(format!("Unsupported grant_type: {}", grant_type)));
        }
    }

    let invalid = || ApiError::Unauthorized("Incorrect username or password".to_string());

    let user = User::find_by_username(&state.db, &form.username)
        .await?
        .ok_or_else(invalid)?;

    if !password::verify_password(&form.password, &user.password_hash)? {
        tracing::info!(username = %form.username, "Rejected login");
        return Err(invalid());
    }

    Ok(Json(issue_token(&state, &user)?))
}

/// Returns the authenticated user
pub async fn me(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<User>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}

fn issue_token(state: &AppState, user: &User) -> ApiResult<TokenResponse> {
    let jwt_config = &state.config.jwt;
    let claims = jwt::Claims::new(
        user.id,
        user.username.clone(),
        chrono::Duration::minutes(jwt_config.expire_minutes),
    );

    Ok(TokenResponse {
        access_token: jwt::create_token(&claims, state.jwt_secret())?,
        token_type: "bearer".to_string(),
        expires_in: jwt_config.expires_in_seconds(),
    })
}
