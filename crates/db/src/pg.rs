//! [`MigrationStore`] backed by PostgreSQL.

use async_trait::async_trait;
use roleshift_core::audit::{AuditEntry, AuditQuery, NewAuditEntry};
use roleshift_core::checksum::checksum;
use roleshift_core::migration::MigrationOperation;
use roleshift_core::roles::Role;
use roleshift_core::snapshot::Snapshot;
use roleshift_core::types::{DbId, OperationId, Timestamp};
use roleshift_core::user::UserAggregate;
use sqlx::PgConnection;

use crate::repositories::snapshot_repo::UNIQUE_OPERATION_USER;
use crate::repositories::{BackupRepo, OperationRepo, RelatedRepo, RoleAuditRepo, SnapshotRepo, UserRepo};
use crate::store::{
    BackupRecord, CommitReceipt, MigrationStore, NewUser, PendingCommit, ReferentialProbe, RelatedRow, StoreError,
};
use crate::DbPool;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(constraint),
        _ => false,
    }
}

/// Apply every pending commit on `conn`. The caller owns the transaction and
/// drops it, rolling back, on any error.
async fn stage_commits(conn: &mut PgConnection, commits: Vec<PendingCommit>) -> Result<Vec<CommitReceipt>, StoreError> {
    // Serializes concurrent demotions so the admin count below is exact.
    let touches_admins = commits.iter().any(|c| c.next_state.role != Role::Admin);
    if touches_admins {
        UserRepo::lock_role_holders(&mut *conn, Role::Admin).await?;
    }
    let had_admins = UserRepo::count_by_role(&mut *conn, Role::Admin).await? > 0;

    let mut receipts = Vec::with_capacity(commits.len());
    for pending in commits {
        let updated = UserRepo::update_versioned(&mut *conn, &pending.next_state, pending.expected_version).await?;
        if !updated {
            return Err(if UserRepo::exists(&mut *conn, pending.user_id).await? {
                StoreError::VersionConflict {
                    user_id: pending.user_id,
                    expected_version: pending.expected_version,
                }
            } else {
                StoreError::UserNotFound(pending.user_id)
            });
        }

        let persisted = UserRepo::find_by_id(&mut *conn, pending.user_id)
            .await?
            .ok_or(StoreError::UserNotFound(pending.user_id))?
            .into_aggregate()?;
        let actual = checksum(&persisted);
        if actual != pending.expected_checksum {
            return Err(StoreError::ChecksumMismatch {
                user_id: pending.user_id,
                expected: pending.expected_checksum,
                actual,
            });
        }

        let snapshot_id = match &pending.snapshot {
            Some(snap) => Some(SnapshotRepo::insert(&mut *conn, snap).await.map_err(|e| {
                if is_unique_violation(&e, UNIQUE_OPERATION_USER) {
                    StoreError::DuplicateSnapshot {
                        operation_id: snap.operation_id,
                        user_id: snap.user_id,
                    }
                } else {
                    StoreError::Database(e)
                }
            })?),
            None => None,
        };

        let audit_entry = RoleAuditRepo::append(&mut *conn, pending.audit).await?;
        receipts.push(CommitReceipt {
            user: persisted,
            audit_entry,
            snapshot_id,
        });
    }

    if had_admins && UserRepo::count_by_role(&mut *conn, Role::Admin).await? == 0 {
        return Err(StoreError::LastAdmin);
    }

    Ok(receipts)
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserAggregate, StoreError> {
        let id = UserRepo::insert(&self.pool, &user).await.map_err(|e| {
            if is_unique_violation(&e, "uq_users_email") {
                StoreError::DuplicateEmail(user.email.clone())
            } else {
                StoreError::Database(e)
            }
        })?;
        UserRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::UserNotFound(id))?
            .into_aggregate()
    }

    async fn insert_related(&self, row: RelatedRow) -> Result<(), StoreError> {
        RelatedRepo::insert(&self.pool, &row).await?;
        Ok(())
    }

    async fn find_user(&self, id: DbId) -> Result<Option<UserAggregate>, StoreError> {
        UserRepo::find_by_id(&self.pool, id)
            .await?
            .map(|row| row.into_aggregate())
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAggregate>, StoreError> {
        UserRepo::find_by_email(&self.pool, email)
            .await?
            .map(|row| row.into_aggregate())
            .transpose()
    }

    async fn list_users(&self) -> Result<Vec<UserAggregate>, StoreError> {
        UserRepo::list(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.into_aggregate())
            .collect()
    }

    async fn list_users_by_role(&self, role: Role) -> Result<Vec<UserAggregate>, StoreError> {
        UserRepo::list_by_role(&self.pool, role)
            .await?
            .into_iter()
            .map(|row| row.into_aggregate())
            .collect()
    }

    async fn count_by_role(&self, role: Role) -> Result<i64, StoreError> {
        Ok(UserRepo::count_by_role(&self.pool, role).await?)
    }

    async fn commit(&self, commits: Vec<PendingCommit>) -> Result<Vec<CommitReceipt>, StoreError> {
        let users = commits.len();
        let mut tx = self.pool.begin().await?;

        let receipts = match stage_commits(&mut *tx, commits).await {
            Ok(receipts) => receipts,
            Err(StoreError::Database(e)) => {
                tracing::error!(users, error = %e, "Role commit failed, transaction rolled back");
                return Err(StoreError::Database(e));
            }
            Err(e) => {
                tracing::warn!(users, error = %e, "Role commit rejected, transaction rolled back");
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            tracing::error!(users, error = %e, "Role commit could not be committed");
            return Err(e.into());
        }
        Ok(receipts)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let mut tx = self.pool.begin().await?;
        let appended = RoleAuditRepo::append(&mut *tx, entry).await?;
        tx.commit().await?;
        Ok(appended)
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        RoleAuditRepo::query(&self.pool, query)
            .await?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }

    async fn audit_chain(&self) -> Result<Vec<AuditEntry>, StoreError> {
        RoleAuditRepo::fetch_chain(&self.pool)
            .await?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }

    async fn snapshots_for_operation(&self, operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError> {
        Ok(SnapshotRepo::list_for_operation(&self.pool, operation_id)
            .await?
            .into_iter()
            .map(Snapshot::from)
            .collect())
    }

    async fn snapshots_for_bulk(&self, bulk_operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError> {
        Ok(SnapshotRepo::list_for_bulk(&self.pool, bulk_operation_id)
            .await?
            .into_iter()
            .map(Snapshot::from)
            .collect())
    }

    async fn purge_expired_snapshots(&self, now: Timestamp) -> Result<u64, StoreError> {
        Ok(SnapshotRepo::delete_expired(&self.pool, now).await?)
    }

    async fn save_operation(&self, operation: &MigrationOperation) -> Result<(), StoreError> {
        Ok(OperationRepo::upsert(&self.pool, operation).await?)
    }

    async fn find_operation(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError> {
        OperationRepo::find_by_id(&self.pool, id)
            .await?
            .map(MigrationOperation::try_from)
            .transpose()
    }

    async fn find_rollback_of(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError> {
        OperationRepo::find_latest_reversal(&self.pool, id)
            .await?
            .map(MigrationOperation::try_from)
            .transpose()
    }

    async fn referential_probe(&self) -> Result<ReferentialProbe, StoreError> {
        Ok(ReferentialProbe {
            orphaned_orders: RelatedRepo::count_orphans(&self.pool, "orders").await?,
            orphaned_donations: RelatedRepo::count_orphans(&self.pool, "donations").await?,
            orphaned_library_items: RelatedRepo::count_orphans(&self.pool, "library_items").await?,
            orphaned_bookmarks: RelatedRepo::count_orphans(&self.pool, "bookmarks").await?,
            duplicate_emails: UserRepo::duplicate_emails(&self.pool).await?,
        })
    }

    async fn save_backup(&self, backup: BackupRecord) -> Result<(), StoreError> {
        Ok(BackupRepo::insert(&self.pool, &backup).await?)
    }

    async fn find_backup(&self, id: uuid::Uuid) -> Result<Option<BackupRecord>, StoreError> {
        Ok(BackupRepo::find_by_id(&self.pool, id).await?.map(BackupRecord::from))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}
