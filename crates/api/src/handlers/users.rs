//! Per-user read endpoints: role history and data checksum.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use roleshift_core::types::DbId;

use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /admin/users/{id}/role-history
pub async fn role_history(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let history = state.engine.audit.role_history(id).await?;
    Ok(Json(DataResponse { data: history }))
}

/// GET /admin/users/{id}/checksum
pub async fn user_checksum(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let report = state.engine.executor.checksum_report(id).await?;
    Ok(Json(DataResponse { data: report }))
}
