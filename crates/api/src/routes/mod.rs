pub mod audit;
pub mod health;
pub mod maintenance;
pub mod migrations;
pub mod roles;
pub mod users;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /admin/roles/assign                               assign one role (POST)
/// /admin/roles/bulk-assign                          assign to many users (POST)
///
/// /admin/migrations/migrate-user                    v2 migration of one user (POST)
/// /admin/migrations/batch                           run a batch inline (POST)
/// /admin/migrations/batch-async                     start a background batch (POST)
/// /admin/migrations/{id}/status                     progress or stored status (GET)
/// /admin/migrations/{id}/report                     final report (GET)
/// /admin/migrations/{id}/cancel                     cancel a running batch (POST)
/// /admin/migrations/{id}/rollback                   reverse a migration (POST)
/// /admin/migrations/batches/{batch_id}/rollback     reverse a batch (POST)
///
/// /admin/audit-log                                  query entries (GET)
/// /admin/audit-log/export                           CSV/JSON export (GET)
/// /admin/audit-log/integrity-check                  verify the hash chain (GET)
///
/// /admin/users/{id}/role-history                    role history (GET)
/// /admin/users/{id}/checksum                        data checksum (GET)
///
/// /admin/maintenance/validate-production-data       data validation (POST)
/// /admin/maintenance/backups                        create backup (POST)
/// /admin/maintenance/backups/{id}/verify            verify backup (POST)
/// /admin/maintenance/resource-report                governor counters (GET)
/// /admin/maintenance/rate-limit/reset               reset operator limiter (POST)
/// ```
///
/// Every route requires the `ADMIN` role (enforced by handler extractors).
pub fn api_routes() -> Router<AppState> {
    let admin = Router::new()
        .nest("/roles", roles::router())
        .nest("/migrations", migrations::router())
        .nest("/audit-log", audit::router())
        .nest("/users", users::router())
        .nest("/maintenance", maintenance::router());

    Router::new().nest("/admin", admin)
}
