use axum::extract::{Extension, Path, Query, State};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::module::Deleted;
use crate::app::AppState;
use crate::collections::MODULE_DATA;
use crate::error::ApiError;
use crate::filter::{Filter, FilterData, FilterPage};
use crate::middleware::{ApiJson, ApiResponse, ApiResult, AuthUser};
use crate::schema::{normalize_row, project_row, ModuleField};
use crate::store::RowRecord;
use crate::types::Operation;

/// Listing parameters. `where` is a JSON object; `order` is either a
/// `"field desc, other"` string or JSON.
#[derive(Debug, Default, Deserialize)]
pub struct RowQuery {
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RowQuery {
    fn into_filter_data(self) -> Result<FilterData, ApiError> {
        let where_clause = match self.where_clause.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|e| ApiError::bad_request(format!("Invalid where parameter: {}", e)))?,
            ),
        };
        let order = match self.order.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) if raw.starts_with('[') || raw.starts_with('{') => Some(
                serde_json::from_str(raw)
                    .map_err(|e| ApiError::bad_request(format!("Invalid order parameter: {}", e)))?,
            ),
            Some(raw) => Some(Value::String(raw.to_string())),
        };

        Ok(FilterData {
            where_clause,
            order,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

type ProjectedRow = Map<String, Value>;

fn project(fields: &[ModuleField], record: &RowRecord) -> ProjectedRow {
    project_row(fields, &record.key, &record.values)
}

/// GET /api/modules/:id/rows - Projected rows (compute values included),
/// filtered, ordered and paginated
pub async fn row_list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(module_id): Path<String>,
    Query(query): Query<RowQuery>,
) -> ApiResult<FilterPage> {
    state.authorize(MODULE_DATA, Operation::List, &user)?;

    let data = query.into_filter_data()?;
    let limits = &state.config.query;
    let filter = Filter::new(&data, limits.default_limit, limits.max_limit)?;

    let module = state.store.get_module(&module_id).await?;
    let rows = state.store.list_rows(&module_id).await?;
    let projected = rows.iter().map(|r| project(&module.fields, r)).collect();

    Ok(ApiResponse::success(filter.apply(projected)))
}

/// GET /api/modules/:id/rows/:key
pub async fn row_get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((module_id, key)): Path<(String, String)>,
) -> ApiResult<ProjectedRow> {
    state.authorize(MODULE_DATA, Operation::View, &user)?;

    let module = state.store.get_module(&module_id).await?;
    let record = state.store.get_row(&module_id, &key).await?;
    Ok(ApiResponse::success(project(&module.fields, &record)))
}

/// POST /api/modules/:id/rows - Insert a row; the key is assigned by the store
pub async fn row_create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(module_id): Path<String>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<ProjectedRow> {
    state.authorize(MODULE_DATA, Operation::Create, &user)?;

    let module = state.store.get_module(&module_id).await?;
    let values = normalize_row(&module.fields, &body, false)?;
    let record = state.store.insert_row(&module_id, values).await?;

    tracing::debug!("Row {} added to module {}", record.key, module_id);
    Ok(ApiResponse::created(project(&module.fields, &record)))
}

/// PUT /api/modules/:id/rows/:key - Full replace, the key is kept
pub async fn row_replace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((module_id, key)): Path<(String, String)>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<ProjectedRow> {
    state.authorize(MODULE_DATA, Operation::Update, &user)?;

    let module = state.store.get_module(&module_id).await?;
    let values = normalize_row(&module.fields, &body, false)?;
    let record = state.store.replace_row(&module_id, &key, values).await?;
    Ok(ApiResponse::success(project(&module.fields, &record)))
}

/// PATCH /api/modules/:id/rows/:key - Merge the given values; `null` clears one
pub async fn row_patch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((module_id, key)): Path<(String, String)>,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<ProjectedRow> {
    state.authorize(MODULE_DATA, Operation::Update, &user)?;

    let module = state.store.get_module(&module_id).await?;
    let changes = normalize_row(&module.fields, &body, true)?;
    let record = state.store.patch_row(&module_id, &key, &module.fields, changes).await?;
    Ok(ApiResponse::success(project(&module.fields, &record)))
}

/// DELETE /api/modules/:id/rows/:key
pub async fn row_delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((module_id, key)): Path<(String, String)>,
) -> ApiResult<Deleted> {
    state.authorize(MODULE_DATA, Operation::Delete, &user)?;
    state.store.delete_row(&module_id, &key).await?;
    Ok(ApiResponse::success(Deleted { id: key, deleted: true }))
}
