// handlers/public/auth/mod.rs - Public authentication handlers

pub mod login;    // POST /auth/login - authenticate and get JWT
pub mod register; // POST /auth/register - create new account

pub use login::login;
pub use register::register;

use serde::Serialize;

use crate::app::AppState;
use crate::auth::{generate_jwt, AuthError, Claims, Session};
use crate::store::UserRecord;
use crate::types::Role;

/// Token plus client session, returned by login, register and refresh
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: u64,
    pub session: Session,
}

pub(crate) fn issue_token(state: &AppState, user_id: &str, username: &str, role: Role) -> Result<TokenResponse, AuthError> {
    let security = &state.config.security;
    let claims = Claims::new(user_id, username, role, security.jwt_expiry_hours);
    Ok(TokenResponse {
        token: generate_jwt(&claims, security)?,
        expires_in: security.jwt_expiry_hours * 3600,
        session: Session::logged_in(username, role),
    })
}

pub(crate) fn issue_token_for(state: &AppState, user: &UserRecord) -> Result<TokenResponse, AuthError> {
    issue_token(state, &user.id, &user.username, user.role)
}
