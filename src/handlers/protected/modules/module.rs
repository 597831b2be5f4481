use axum::extract::{Extension, Path, State};
use serde::Serialize;
use tracing::info;

use crate::app::AppState;
use crate::collections::MODULES;
use crate::middleware::{ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::schema::{Module, ModuleDraft};
use crate::types::Operation;

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: String,
    pub deleted: bool,
}

/// GET /api/modules - All module definitions in creation order
pub async fn module_list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<Module>> {
    state.authorize(MODULES, Operation::List, &user)?;
    Ok(ApiResponse::success(state.store.list_modules().await?))
}

/// GET /api/modules/:id
pub async fn module_get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Module> {
    state.authorize(MODULES, Operation::View, &user)?;
    Ok(ApiResponse::success(state.store.get_module(&id).await?))
}

/// POST /api/modules - Create a module from `{name, fields}`
///
/// Field definitions are validated as a whole; every problem is reported in
/// `field_errors` keyed by path, e.g. `fields[1].formula`.
pub async fn module_create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(draft): ApiJson<ModuleDraft>,
) -> ApiResult<Module> {
    state.authorize(MODULES, Operation::Create, &user)?;
    draft.validate()?;

    let module = state.store.create_module(draft.name.trim(), draft.fields).await?;
    info!("Module '{}' ({}) created by '{}'", module.name, module.id, user.username);
    Ok(ApiResponse::created(module))
}

/// PUT /api/modules/:id - Replace name and fields. Existing rows are kept;
/// values for removed fields are no longer shown.
pub async fn module_update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(draft): ApiJson<ModuleDraft>,
) -> ApiResult<Module> {
    state.authorize(MODULES, Operation::Update, &user)?;
    draft.validate()?;

    let module = state.store.update_module(&id, draft.name.trim(), draft.fields).await?;
    info!("Module '{}' ({}) updated by '{}'", module.name, module.id, user.username);
    Ok(ApiResponse::success(module))
}

/// DELETE /api/modules/:id - Removes the module and all of its rows
pub async fn module_delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    state.authorize(MODULES, Operation::Delete, &user)?;
    state.store.delete_module(&id).await?;

    info!("Module {} deleted by '{}'", id, user.username);
    Ok(ApiResponse::success(Deleted { id, deleted: true }))
}
