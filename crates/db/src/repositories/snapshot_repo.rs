//! Repository for the `migration_snapshots` table.

use roleshift_core::snapshot::NewSnapshot;
use roleshift_core::types::{DbId, Timestamp};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::snapshot::SnapshotRow;

const COLUMNS: &str = "\
    id, operation_id, bulk_operation_id, user_id, state, checksum, pre_version, \
    created_at, expires_at";

/// Name of the unique constraint on `(operation_id, user_id)`.
pub const UNIQUE_OPERATION_USER: &str = "uq_migration_snapshots_operation_user";

pub struct SnapshotRepo;

impl SnapshotRepo {
    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, snap: &NewSnapshot) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO migration_snapshots \
                (operation_id, bulk_operation_id, user_id, state, checksum, pre_version, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(snap.operation_id)
        .bind(snap.bulk_operation_id)
        .bind(snap.user_id)
        .bind(&snap.state)
        .bind(&snap.checksum)
        .bind(snap.pre_version)
        .bind(snap.created_at)
        .bind(snap.expires_at)
        .fetch_one(executor)
        .await
    }

    pub async fn list_for_operation<'e, E: PgExecutor<'e>>(
        executor: E,
        operation_id: Uuid,
    ) -> Result<Vec<SnapshotRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM migration_snapshots WHERE operation_id = $1 ORDER BY id");
        sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(operation_id)
            .fetch_all(executor)
            .await
    }

    pub async fn list_for_bulk<'e, E: PgExecutor<'e>>(
        executor: E,
        bulk_operation_id: Uuid,
    ) -> Result<Vec<SnapshotRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM migration_snapshots WHERE bulk_operation_id = $1 ORDER BY id");
        sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(bulk_operation_id)
            .fetch_all(executor)
            .await
    }

    /// Delete snapshots past their retention. Returns the number removed.
    pub async fn delete_expired<'e, E: PgExecutor<'e>>(executor: E, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM migration_snapshots WHERE expires_at <= $1")
            .bind(now)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
