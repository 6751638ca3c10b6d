use axum::routing::get;
use axum::Router;

use crate::handlers::users;
use crate::state::AppState;

/// Per-user routes mounted at `/admin/users`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/role-history", get(users::role_history))
        .route("/{id}/checksum", get(users::user_checksum))
}
