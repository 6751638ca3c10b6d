use roleshift_core::migration::{MigrationOperation, OperationScope, OperationStatus};
use roleshift_core::roles::Role;
use roleshift_core::types::{DbId, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::StoreError;

/// A `migration_operations` row.
#[derive(Debug, Clone, FromRow)]
pub struct OperationRow {
    pub id: Uuid,
    pub scope: String,
    pub from_role: Option<String>,
    pub to_role: Option<String>,
    pub target_user_ids: Vec<DbId>,
    pub status: String,
    pub dry_run: bool,
    pub reverses: Option<Uuid>,
    pub requested_by: DbId,
    pub reason: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

fn decode_role(value: Option<String>) -> Result<Option<Role>, StoreError> {
    value
        .map(|r| Role::from_str_value(&r))
        .transpose()
        .map_err(|e| StoreError::Decode(e.to_string()))
}

impl TryFrom<OperationRow> for MigrationOperation {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        Ok(MigrationOperation {
            id: row.id,
            scope: OperationScope::from_str_value(&row.scope).map_err(|e| StoreError::Decode(e.to_string()))?,
            from_role: decode_role(row.from_role)?,
            to_role: decode_role(row.to_role)?,
            target_user_ids: row.target_user_ids,
            status: OperationStatus::from_str_value(&row.status).map_err(|e| StoreError::Decode(e.to_string()))?,
            dry_run: row.dry_run,
            reverses: row.reverses,
            requested_by: row.requested_by,
            reason: row.reason,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
