//! Pre-migration maintenance: production data validation, backups,
//! governor resource report, and the operator rate limiter.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use roleshift_engine::{BackupOptions, ValidationChecks};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /admin/maintenance/validate-production-data
///
/// Body is optional; every check runs by default.
pub async fn validate_production_data(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    body: Option<Json<ValidationChecks>>,
) -> AppResult<impl IntoResponse> {
    let Json(checks) = body.unwrap_or_default();
    let validation = state.engine.validator.validate(checks).await?;
    Ok(Json(DataResponse { data: validation }))
}

/// POST /admin/maintenance/backups
pub async fn create_backup(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    body: Option<Json<BackupOptions>>,
) -> AppResult<impl IntoResponse> {
    let Json(options) = body.unwrap_or_default();
    let receipt = state.engine.backups.create(options).await?;
    tracing::info!(
        backup_id = %receipt.backup_id,
        created_by = admin.user_id,
        users = receipt.user_count,
        "Pre-migration backup created",
    );
    Ok((StatusCode::CREATED, Json(DataResponse { data: receipt })))
}

/// POST /admin/maintenance/backups/{id}/verify
pub async fn verify_backup(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let verification = state.engine.backups.verify(id).await?;
    Ok(Json(DataResponse { data: verification }))
}

/// GET /admin/maintenance/resource-report
pub async fn resource_report(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.engine.governor.report(),
    }))
}

/// POST /admin/maintenance/rate-limit/reset
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    state.engine.limiter.reset().await;
    tracing::info!(reset_by = admin.user_id, "Operator rate limiter reset");
    Ok(StatusCode::NO_CONTENT)
}
