// handlers/pages.rs - Page routes behind the navigation guard
//
// Any path not claimed by the API lands here. Rendered routes come back as
// `{view, name, layout, params}` for the client to mount.

use axum::{
    extract::State,
    http::{HeaderMap, Uri},
    response::{IntoResponse, Redirect, Response},
};

use crate::app::AppState;
use crate::auth::validate_jwt;
use crate::error::ApiError;
use crate::middleware::{extract_page_token, ApiResponse};
use crate::navigation::Navigation;

/// Router fallback
pub async fn navigate(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> Response {
    let path = uri.path();
    if path == "/api" || path.starts_with("/api/") || path.starts_with("/auth/") {
        return ApiError::not_found(format!("No route for {}", path)).into_response();
    }
    resolve_page(&state, &headers, path)
}

pub fn resolve_page(state: &AppState, headers: &HeaderMap, path: &str) -> Response {
    let authenticated = extract_page_token(headers)
        .map_or(false, |token| validate_jwt(&token, &state.config.security).is_ok());

    match state.routes.resolve(path, authenticated) {
        Navigation::Render(route) => ApiResponse::success(route).into_response(),
        Navigation::Redirect { location } => Redirect::to(&location).into_response(),
        Navigation::NotFound { path } => {
            ApiError::not_found(format!("Page {} not found", path)).into_response()
        }
    }
}
