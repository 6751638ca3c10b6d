use roleshift_core::types::Timestamp;
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::BackupRecord;

/// A `data_backups` row.
#[derive(Debug, Clone, FromRow)]
pub struct BackupRow {
    pub id: Uuid,
    pub created_at: Timestamp,
    pub checksum: String,
    pub encrypted: bool,
    pub user_count: i64,
    pub payload: Vec<u8>,
}

impl From<BackupRow> for BackupRecord {
    fn from(row: BackupRow) -> Self {
        BackupRecord {
            id: row.id,
            created_at: row.created_at,
            checksum: row.checksum,
            encrypted: row.encrypted,
            user_count: row.user_count,
            payload: row.payload,
        }
    }
}
