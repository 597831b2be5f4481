use axum::extract::State;

use crate::app::AppState;
use crate::collections::Collection;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /api/collections - Collection definitions after all migrations
pub async fn collection_list(State(state): State<AppState>) -> ApiResult<Vec<Collection>> {
    Ok(ApiResponse::success(state.collections.all().to_vec()))
}
