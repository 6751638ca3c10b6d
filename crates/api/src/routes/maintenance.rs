use axum::routing::{get, post};
use axum::Router;

use crate::handlers::maintenance;
use crate::state::AppState;

/// Maintenance routes mounted at `/admin/maintenance`.
///
/// ```text
/// POST /validate-production-data   -> validate_production_data
/// POST /backups                    -> create_backup
/// POST /backups/{id}/verify        -> verify_backup
/// GET  /resource-report            -> resource_report
/// POST /rate-limit/reset           -> reset_rate_limit
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/validate-production-data",
            post(maintenance::validate_production_data),
        )
        .route("/backups", post(maintenance::create_backup))
        .route("/backups/{id}/verify", post(maintenance::verify_backup))
        .route("/resource-report", get(maintenance::resource_report))
        .route("/rate-limit/reset", post(maintenance::reset_rate_limit))
}
