use roleshift_core::snapshot::Snapshot;
use roleshift_core::types::{DbId, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

/// A `migration_snapshots` row.
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub id: DbId,
    pub operation_id: Uuid,
    pub bulk_operation_id: Option<Uuid>,
    pub user_id: DbId,
    pub state: serde_json::Value,
    pub checksum: String,
    pub pre_version: i64,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            id: row.id,
            operation_id: row.operation_id,
            bulk_operation_id: row.bulk_operation_id,
            user_id: row.user_id,
            state: row.state,
            checksum: row.checksum,
            pre_version: row.pre_version,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}
