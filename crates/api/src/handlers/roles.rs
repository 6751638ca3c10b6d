//! Handlers for direct role assignment.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use roleshift_core::integrity::CorruptionMode;
use roleshift_core::types::DbId;
use roleshift_engine::{
    AssignRoleRequest, BatchOptions, BatchRequest, BatchSelector, MigrationResult, OperationReport,
    UserRef,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{target_ref, validated};
use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct AssignRoleBody {
    pub user_id: Option<DbId>,
    #[validate(email)]
    pub email: Option<String>,
    /// Left unchecked here; the engine rejects (and audits) unknown roles.
    pub new_role: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub reason: Option<String>,
    #[serde(default)]
    pub notify_user: bool,
    #[serde(default)]
    pub confirm_self_modification: bool,
    #[serde(default)]
    pub handle_corruption: CorruptionMode,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkAssignBody {
    /// Explicit targets; ids and emails may be mixed.
    #[validate(length(min = 1))]
    pub target_users: Option<Vec<UserRef>>,
    /// Alternative to `target_users`: every user holding this role.
    pub from_role: Option<String>,
    pub new_role: String,
    #[validate(length(min = 1, max = 500))]
    pub reason: Option<String>,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub send_notifications: bool,
    #[serde(default)]
    pub handle_corruption: CorruptionMode,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct RoleChangeResponse {
    /// False when the change was skipped as a no-op.
    pub success: bool,
    #[serde(flatten)]
    pub result: MigrationResult,
}

impl From<MigrationResult> for RoleChangeResponse {
    fn from(result: MigrationResult) -> Self {
        Self {
            success: !result.skipped,
            result,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /admin/roles/assign
pub async fn assign_role(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<AssignRoleBody>,
) -> AppResult<impl IntoResponse> {
    let body = validated(body)?;
    let target = target_ref(body.user_id, body.email)?;

    let req = AssignRoleRequest {
        target,
        new_role: body.new_role,
        reason: body.reason,
        notify_user: body.notify_user,
        confirm_self_modification: body.confirm_self_modification,
        corruption_mode: body.handle_corruption,
    };
    let result = state.engine.executor.assign_role(req, &admin.actor()).await?;

    Ok(Json(DataResponse {
        data: RoleChangeResponse::from(result),
    }))
}

/// POST /admin/roles/bulk-assign
///
/// Always answers with the batch summary; per-user failures are itemised
/// in `errors` rather than failing the request.
pub async fn bulk_assign_role(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<BulkAssignBody>,
) -> AppResult<impl IntoResponse> {
    let body = validated(body)?;

    let selector = match (body.target_users, body.from_role) {
        (Some(users), _) => BatchSelector::Explicit {
            users,
            new_role: body.new_role,
        },
        (None, Some(from_role)) => BatchSelector::FromRole {
            from_role,
            to_role: body.new_role,
        },
        (None, None) => {
            return Err(AppError::BadRequest(
                "Either target_users or from_role is required".into(),
            ))
        }
    };

    let req = BatchRequest {
        selector,
        reason: body.reason,
        options: BatchOptions {
            continue_on_error: body.continue_on_error,
            notify_users: body.send_notifications,
            corruption_mode: body.handle_corruption,
            ..Default::default()
        },
    };
    let report = state.engine.executor.run_batch(req, admin.actor()).await?;

    if let OperationReport::Batch(batch) = &report {
        if let Some(failure) = batch.failure() {
            tracing::warn!(
                bulk_operation_id = %batch.bulk_operation_id,
                error = %failure,
                "Bulk role assignment finished with failures",
            );
        }
    }

    Ok(Json(DataResponse { data: report }))
}
