use axum::routing::post;
use axum::Router;

use crate::handlers::roles;
use crate::state::AppState;

/// Role assignment routes mounted at `/admin/roles`.
///
/// ```text
/// POST /assign        -> assign_role
/// POST /bulk-assign   -> bulk_assign_role
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assign", post(roles::assign_role))
        .route("/bulk-assign", post(roles::bulk_assign_role))
}
