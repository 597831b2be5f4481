// handlers/public/auth/register.rs - POST /auth/register handler

use axum::extract::State;
use serde::Deserialize;
use tracing::info;

use super::{issue_token_for, TokenResponse};
use crate::app::AppState;
use crate::auth::{hash_password, validate_password, validate_username};
use crate::middleware::{ApiJson, ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// POST /auth/register - Register new user account
///
/// The first account ever registered becomes `admin`; later ones are `user`.
/// Responds 201 with the same token payload as login, 409 when the username is taken.
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> ApiResult<TokenResponse> {
    let username = payload.username.trim();
    validate_username(username)?;
    validate_password(&payload.password, state.config.security.min_password_length)?;

    let user = state
        .store
        .create_user(username, &hash_password(&payload.password), None)
        .await?;

    info!("Registered user '{}' with role {}", user.username, user.role);
    Ok(ApiResponse::created(issue_token_for(&state, &user)?))
}
