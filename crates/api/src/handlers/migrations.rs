//! Handlers for role-system migrations, their progress, and rollback.
//!
//! Batch migrations run either inline (`/batch`) or in the background
//! (`/batch-async`), in which case callers poll `/{id}/status` and fetch
//! `/{id}/report` once the batch is terminal.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use roleshift_core::integrity::CorruptionMode;
use roleshift_core::types::{DbId, OperationId};
use roleshift_engine::{BatchOptions, BatchRequest, BatchSelector, UserMigrationRequest};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::roles::RoleChangeResponse;
use super::{target_ref, validated};
use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct MigrateUserBody {
    pub user_id: Option<DbId>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub reason: Option<String>,
    #[serde(default)]
    pub notify_user: bool,
    #[serde(default)]
    pub handle_corruption: CorruptionMode,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchMigrationBody {
    pub from_role: String,
    pub to_role: String,
    #[validate(length(min = 1, max = 500))]
    pub reason: Option<String>,
    /// Users per chunk; the engine default applies when absent.
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub atomic_transaction: bool,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub throttle: bool,
    #[serde(default)]
    pub handle_corruption: CorruptionMode,
    #[serde(default)]
    pub send_notifications: bool,
}

impl From<BatchMigrationBody> for BatchRequest {
    fn from(body: BatchMigrationBody) -> Self {
        Self {
            selector: BatchSelector::FromRole {
                from_role: body.from_role,
                to_role: body.to_role,
            },
            reason: body.reason,
            options: BatchOptions {
                chunk_size: body.batch_size,
                parallel: body.parallel,
                atomic_transaction: body.atomic_transaction,
                continue_on_error: body.continue_on_error,
                dry_run: body.dry_run,
                throttle: body.throttle,
                corruption_mode: body.handle_corruption,
                notify_users: body.send_notifications,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MigrationStarted {
    pub migration_id: OperationId,
}

/// Rollbacks are always validated against the current user state;
/// the flag is accepted for client compatibility.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RollbackBody {
    pub validate_rollback: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BatchRollbackBody {
    pub atomic_rollback: bool,
}

impl Default for BatchRollbackBody {
    fn default() -> Self {
        Self {
            atomic_rollback: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Migration handlers
// ---------------------------------------------------------------------------

/// POST /admin/migrations/migrate-user
pub async fn migrate_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<MigrateUserBody>,
) -> AppResult<impl IntoResponse> {
    let body = validated(body)?;
    let req = UserMigrationRequest {
        target: target_ref(body.user_id, body.email)?,
        reason: body.reason,
        notify_user: body.notify_user,
        corruption_mode: body.handle_corruption,
    };
    let result = state.engine.executor.migrate_user(req, &admin.actor()).await?;

    Ok(Json(DataResponse {
        data: RoleChangeResponse::from(result),
    }))
}

/// POST /admin/migrations/batch
pub async fn batch_migrate(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<BatchMigrationBody>,
) -> AppResult<impl IntoResponse> {
    let body = validated(body)?;
    let report = state
        .engine
        .executor
        .run_batch(body.into(), admin.actor())
        .await?;
    Ok(Json(DataResponse { data: report }))
}

/// POST /admin/migrations/batch-async
///
/// Returns 202 with the id to poll.
pub async fn batch_migrate_async(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<BatchMigrationBody>,
) -> AppResult<impl IntoResponse> {
    let body = validated(body)?;
    let migration_id = state
        .engine
        .executor
        .start_batch(body.into(), admin.actor())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: MigrationStarted { migration_id },
        }),
    ))
}

/// GET /admin/migrations/{id}/status
pub async fn migration_status(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<OperationId>,
) -> AppResult<impl IntoResponse> {
    let progress = state.engine.operation_status(id).await?;
    Ok(Json(DataResponse { data: progress }))
}

/// GET /admin/migrations/{id}/report
pub async fn migration_report(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<OperationId>,
) -> AppResult<impl IntoResponse> {
    let report = state.engine.operation_report(id).await?;
    Ok(Json(DataResponse { data: report }))
}

/// POST /admin/migrations/{id}/cancel
pub async fn cancel_migration(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<OperationId>,
) -> AppResult<impl IntoResponse> {
    let record = state.engine.tracker.cancel(id).await?;
    Ok(Json(DataResponse { data: record }))
}

// ---------------------------------------------------------------------------
// Rollback handlers
// ---------------------------------------------------------------------------

/// POST /admin/migrations/{id}/rollback
pub async fn rollback_migration(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<OperationId>,
    body: Option<Json<RollbackBody>>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = body.unwrap_or_default();
    if body.validate_rollback == Some(false) {
        tracing::debug!(operation_id = %id, "validate_rollback=false ignored");
    }

    let report = state
        .engine
        .rollback
        .rollback_operation(id, &admin.actor())
        .await?;
    Ok(Json(DataResponse { data: report }))
}

/// POST /admin/migrations/batches/{batch_id}/rollback
///
/// Partial failures are reported in the body, not as an error status.
pub async fn rollback_batch_migration(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(batch_id): Path<OperationId>,
    body: Option<Json<BatchRollbackBody>>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = body.unwrap_or_default();
    let report = state
        .engine
        .rollback
        .rollback_batch(batch_id, body.atomic_rollback, &admin.actor())
        .await?;
    Ok(Json(DataResponse { data: report }))
}
