//! Repository for the `data_backups` table.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::backup::BackupRow;
use crate::store::BackupRecord;

const COLUMNS: &str = "id, created_at, checksum, encrypted, user_count, payload";

pub struct BackupRepo;

impl BackupRepo {
    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, backup: &BackupRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO data_backups (id, created_at, checksum, encrypted, user_count, payload) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(backup.id)
        .bind(backup.created_at)
        .bind(&backup.checksum)
        .bind(backup.encrypted)
        .bind(backup.user_count)
        .bind(&backup.payload)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<Option<BackupRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM data_backups WHERE id = $1");
        sqlx::query_as::<_, BackupRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }
}
