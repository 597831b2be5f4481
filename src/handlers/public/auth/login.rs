// handlers/public/auth/login.rs - POST /auth/login handler

use axum::extract::State;
use serde::Deserialize;
use tracing::{info, warn};

use super::{issue_token_for, TokenResponse};
use crate::app::AppState;
use crate::auth::{verify_password, AuthError};
use crate::middleware::{ApiJson, ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /auth/login - Authenticate user and receive JWT token
///
/// Expected Input:
/// ```json
/// { "username": "admin", "password": "secret123" }
/// ```
///
/// Expected Output (Success):
/// ```json
/// {
///   "success": true,
///   "data": {
///     "token": "eyJhbGciOiJIUzI1NiI...",
///     "expires_in": 604800,
///     "session": { "isLoggedIn": true, "user": { "name": "admin", "role": "admin" } }
///   }
/// }
/// ```
///
/// Unknown users and wrong passwords get the same 401.
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<TokenResponse> {
    let username = payload.username.trim();
    let user = state.store.find_user(username).await?;

    let Some(user) = user.filter(|u| verify_password(&payload.password, &u.password_hash)) else {
        warn!("Failed login for '{}'", username);
        return Err(AuthError::InvalidCredentials.into());
    };

    info!("User '{}' logged in as {}", user.username, user.role);
    Ok(ApiResponse::success(issue_token_for(&state, &user)?))
}
