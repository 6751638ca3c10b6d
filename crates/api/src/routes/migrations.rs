use axum::routing::{get, post};
use axum::Router;

use crate::handlers::migrations;
use crate::state::AppState;

/// Migration routes mounted at `/admin/migrations`.
///
/// ```text
/// POST /migrate-user                  -> migrate_user
/// POST /batch                         -> batch_migrate
/// POST /batch-async                   -> batch_migrate_async
/// GET  /{id}/status                   -> migration_status
/// GET  /{id}/report                   -> migration_report
/// POST /{id}/cancel                   -> cancel_migration
/// POST /{id}/rollback                 -> rollback_migration
/// POST /batches/{batch_id}/rollback   -> rollback_batch_migration
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/migrate-user", post(migrations::migrate_user))
        .route("/batch", post(migrations::batch_migrate))
        .route("/batch-async", post(migrations::batch_migrate_async))
        .route("/{id}/status", get(migrations::migration_status))
        .route("/{id}/report", get(migrations::migration_report))
        .route("/{id}/cancel", post(migrations::cancel_migration))
        .route("/{id}/rollback", post(migrations::rollback_migration))
        .route(
            "/batches/{batch_id}/rollback",
            post(migrations::rollback_batch_migration),
        )
}
