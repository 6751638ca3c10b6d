//! Handlers for the role audit log.
//!
//! All endpoints require admin role.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use roleshift_core::audit::AuditQuery;
use roleshift_engine::ExportFormat;
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for audit log export, alongside the usual filters.
#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub format: Option<String>,
}

/// GET /admin/audit-log
///
/// Filters: `target_user_id`, `performed_by`, `action`, `type`,
/// `operation_id`, `bulk_operation_id`, `from`, `to`, `limit`, `offset`.
/// Newest entries first.
pub async fn query_audit_log(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<AuditQuery>,
) -> AppResult<impl IntoResponse> {
    let entries = state.engine.audit.query(&query).await?;
    Ok(Json(DataResponse { data: entries }))
}

/// GET /admin/audit-log/export?format=csv|json
///
/// Serves the file as an attachment; defaults to CSV.
pub async fn export_audit_log(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Query(params): Query<ExportParams>,
    Query(query): Query<AuditQuery>,
) -> AppResult<impl IntoResponse> {
    let format = match params.format.as_deref() {
        Some(raw) => ExportFormat::from_str_value(raw)?,
        None => ExportFormat::Csv,
    };
    let export = state.engine.audit.export(&query, format).await?;
    tracing::info!(
        exported_by = admin.user_id,
        entries = export.entries,
        filename = %export.filename,
        "Audit log exported",
    );

    let disposition = format!("attachment; filename=\"{}\"", export.filename);
    Ok((
        [
            (header::CONTENT_TYPE, export.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.body,
    ))
}

/// GET /admin/audit-log/integrity-check
pub async fn check_integrity(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    let verification = state.engine.audit.verify_integrity().await?;
    if !verification.chain_valid {
        tracing::warn!(
            first_break_at = ?verification.first_break_at,
            "Audit hash chain is broken",
        );
    }
    Ok(Json(DataResponse { data: verification }))
}
