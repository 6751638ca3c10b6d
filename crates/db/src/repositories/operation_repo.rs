//! Repository for the `migration_operations` table.

use roleshift_core::migration::{MigrationOperation, SCOPE_ROLLBACK};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::operation::OperationRow;

const COLUMNS: &str = "\
    id, scope, from_role, to_role, target_user_ids, status, dry_run, reverses, \
    requested_by, reason, error_message, created_at, updated_at";

pub struct OperationRepo;

impl OperationRepo {
    /// Insert the operation, or overwrite its mutable columns if it exists.
    pub async fn upsert<'e, E: PgExecutor<'e>>(executor: E, op: &MigrationOperation) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO migration_operations \
                (id, scope, from_role, to_role, target_user_ids, status, dry_run, reverses, \
                 requested_by, reason, error_message, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET \
                target_user_ids = EXCLUDED.target_user_ids, \
                status = EXCLUDED.status, \
                error_message = EXCLUDED.error_message, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(op.id)
        .bind(op.scope.as_str())
        .bind(op.from_role.map(|r| r.as_str()))
        .bind(op.to_role.map(|r| r.as_str()))
        .bind(&op.target_user_ids)
        .bind(op.status.as_str())
        .bind(op.dry_run)
        .bind(op.reverses)
        .bind(op.requested_by)
        .bind(&op.reason)
        .bind(&op.error_message)
        .bind(op.created_at)
        .bind(op.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<Option<OperationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM migration_operations WHERE id = $1");
        sqlx::query_as::<_, OperationRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_latest_reversal<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<OperationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM migration_operations \
             WHERE reverses = $1 AND scope = '{SCOPE_ROLLBACK}' \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, OperationRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }
}
