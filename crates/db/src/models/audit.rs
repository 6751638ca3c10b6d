use roleshift_core::audit::{AuditAction, AuditEntry};
use roleshift_core::types::{DbId, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::StoreError;

/// A `role_audit_log` row. Rows are never updated or deleted.
#[derive(Debug, Clone, FromRow)]
pub struct AuditRow {
    pub id: DbId,
    pub operation_id: Option<Uuid>,
    pub bulk_operation_id: Option<Uuid>,
    pub rollback_of: Option<Uuid>,
    pub target_user_id: Option<DbId>,
    pub target_email: Option<String>,
    pub action: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub rejection_code: Option<String>,
    pub performed_by: DbId,
    pub ip_address: Option<String>,
    pub timestamp: Timestamp,
    pub integrity_hash: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let action = AuditAction::from_str_value(&row.action).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(AuditEntry {
            id: row.id,
            operation_id: row.operation_id,
            bulk_operation_id: row.bulk_operation_id,
            rollback_of: row.rollback_of,
            target_user_id: row.target_user_id,
            target_email: row.target_email,
            action,
            old_value: row.old_value,
            new_value: row.new_value,
            reason: row.reason,
            rejection_code: row.rejection_code,
            performed_by: row.performed_by,
            ip_address: row.ip_address,
            timestamp: row.timestamp,
            integrity_hash: row.integrity_hash,
        })
    }
}
