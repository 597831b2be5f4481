use axum::extract::{Extension, State};
use serde::Serialize;

use crate::app::AppState;
use crate::auth::Session;
use crate::error::ApiError;
use crate::handlers::public::auth::{issue_token, TokenResponse};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};

#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub id: String,
    pub username: String,
    pub role: String,
    pub session: Session,
}

/// GET /api/auth/whoami - Current user and session as carried by the token
pub async fn whoami(Extension(user): Extension<AuthUser>) -> ApiResult<WhoamiResponse> {
    Ok(ApiResponse::success(WhoamiResponse {
        session: Session::logged_in(&user.username, user.role),
        role: user.role.as_str().to_string(),
        id: user.user_id,
        username: user.username,
    }))
}

/// PUT /api/auth/refresh - Reissue a token with a fresh expiry
pub async fn refresh(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<TokenResponse> {
    // The account may have been removed since the token was issued
    let record = state
        .store
        .find_user(&user.username)
        .await?
        .filter(|r| r.id == user.user_id)
        .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))?;

    tracing::info!("Refreshed token for '{}'", record.username);
    Ok(ApiResponse::success(issue_token(&state, &record.id, &record.username, record.role)?))
}

/// POST /api/auth/logout - Tokens are stateless; this returns the cleared session
pub async fn logout(Extension(user): Extension<AuthUser>) -> ApiResult<Session> {
    tracing::info!("User '{}' logged out", user.username);
    Ok(ApiResponse::success(Session::cleared()))
}
