use axum::routing::get;
use axum::Router;

use crate::handlers::audit;
use crate::state::AppState;

/// Audit routes mounted at `/admin/audit-log`.
///
/// ```text
/// GET  /                  -> query_audit_log
/// GET  /export            -> export_audit_log
/// GET  /integrity-check   -> check_integrity
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(audit::query_audit_log))
        .route("/export", get(audit::export_audit_log))
        .route("/integrity-check", get(audit::check_integrity))
}
