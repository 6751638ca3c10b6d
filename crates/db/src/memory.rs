//! In-process [`MigrationStore`] used when no database is configured and by
//! the test suites.
//!
//! All state sits behind one async mutex, so a `commit` is atomic with
//! respect to every other call. Each commit is staged on a copy of the
//! touched rows and only written back once every check has passed.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use roleshift_core::audit::{canonical_entry_data, compute_integrity_hash, AuditEntry, AuditQuery, NewAuditEntry};
use roleshift_core::checksum::checksum;
use roleshift_core::migration::{MigrationOperation, OperationScope};
use roleshift_core::roles::Role;
use roleshift_core::snapshot::{NewSnapshot, Snapshot};
use roleshift_core::types::{DbId, OperationId, Timestamp};
use roleshift_core::user::{Preferences, Profile, RelatedSummary, StructuredField, UserAggregate};
use tokio::sync::Mutex;

use crate::store::{
    BackupRecord, CommitReceipt, MigrationStore, NewUser, PendingCommit, ReferentialProbe, RelatedRow, StoreError,
};

#[derive(Debug, Clone)]
struct UserRecord {
    id: DbId,
    email: String,
    name: Option<String>,
    role: Role,
    subscription_status: Option<String>,
    preferences: StructuredField<Preferences>,
    profile: StructuredField<Profile>,
    created_at: Timestamp,
    last_login_at: Option<Timestamp>,
    version: i64,
}

#[derive(Default)]
struct State {
    users: BTreeMap<DbId, UserRecord>,
    related: Vec<RelatedRow>,
    audit: Vec<AuditEntry>,
    snapshots: Vec<Snapshot>,
    operations: HashMap<OperationId, MigrationOperation>,
    backups: HashMap<uuid::Uuid, BackupRecord>,
    next_user_id: DbId,
    next_snapshot_id: DbId,
}

impl State {
    fn summary(&self, user_id: DbId) -> RelatedSummary {
        let mut summary = RelatedSummary::default();
        for row in &self.related {
            match row {
                RelatedRow::Order { user_id: u, amount_cents } if *u == user_id => {
                    summary.orders_count += 1;
                    summary.total_order_value_cents += amount_cents;
                }
                RelatedRow::Donation { user_id: u, amount_cents } if *u == user_id => {
                    summary.donations_count += 1;
                    summary.total_donation_cents += amount_cents;
                }
                RelatedRow::LibraryItem { user_id: u, .. } if *u == user_id => summary.library_items += 1,
                RelatedRow::Bookmark { user_id: u, .. } if *u == user_id => summary.bookmarks += 1,
                _ => {}
            }
        }
        summary
    }

    fn aggregate(&self, record: &UserRecord) -> UserAggregate {
        UserAggregate {
            id: record.id,
            email: record.email.clone(),
            name: record.name.clone(),
            role: record.role,
            subscription_status: record.subscription_status.clone(),
            preferences: record.preferences.clone(),
            profile: record.profile.clone(),
            related: self.summary(record.id),
            created_at: record.created_at,
            last_login_at: record.last_login_at,
            version: record.version,
        }
    }

    fn chain_audit(&self, staged: &[AuditEntry], entry: NewAuditEntry) -> AuditEntry {
        let prev = staged
            .last()
            .or(self.audit.last())
            .map(|e| e.integrity_hash.as_str());
        let hash = compute_integrity_hash(prev, &canonical_entry_data(&entry));
        let id = self.audit.len() as DbId + staged.len() as DbId + 1;
        entry.into_entry(id, hash)
    }
}

/// Users, audit trail, snapshots, operations, and backups held in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserAggregate, StoreError> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail(user.email));
        }
        state.next_user_id += 1;
        let record = UserRecord {
            id: state.next_user_id,
            email: user.email,
            name: user.name,
            role: user.role,
            subscription_status: user.subscription_status,
            preferences: user.preferences,
            profile: user.profile,
            created_at: user.created_at.unwrap_or_else(Utc::now),
            last_login_at: user.last_login_at,
            version: 1,
        };
        let aggregate = state.aggregate(&record);
        state.users.insert(record.id, record);
        Ok(aggregate)
    }

    async fn insert_related(&self, row: RelatedRow) -> Result<(), StoreError> {
        self.state.lock().await.related.push(row);
        Ok(())
    }

    async fn find_user(&self, id: DbId) -> Result<Option<UserAggregate>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.get(&id).map(|r| state.aggregate(r)))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAggregate>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|r| r.email.eq_ignore_ascii_case(email))
            .map(|r| state.aggregate(r)))
    }

    async fn list_users(&self) -> Result<Vec<UserAggregate>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.values().map(|r| state.aggregate(r)).collect())
    }

    async fn list_users_by_role(&self, role: Role) -> Result<Vec<UserAggregate>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .filter(|r| r.role == role)
            .map(|r| state.aggregate(r))
            .collect())
    }

    async fn count_by_role(&self, role: Role) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.values().filter(|r| r.role == role).count() as i64)
    }

    async fn commit(&self, commits: Vec<PendingCommit>) -> Result<Vec<CommitReceipt>, StoreError> {
        let mut state = self.state.lock().await;

        let mut staged_users: BTreeMap<DbId, UserRecord> = BTreeMap::new();
        let mut staged_snapshots: Vec<Snapshot> = Vec::new();
        let mut staged_audit: Vec<AuditEntry> = Vec::new();
        let mut receipts = Vec::with_capacity(commits.len());

        for pending in commits {
            let current = staged_users
                .get(&pending.user_id)
                .or_else(|| state.users.get(&pending.user_id))
                .cloned()
                .ok_or(StoreError::UserNotFound(pending.user_id))?;

            if current.version != pending.expected_version {
                return Err(StoreError::VersionConflict {
                    user_id: pending.user_id,
                    expected_version: pending.expected_version,
                });
            }

            let next = &pending.next_state;
            let updated = UserRecord {
                role: next.role,
                name: next.name.clone(),
                subscription_status: next.subscription_status.clone(),
                preferences: next.preferences.clone(),
                profile: next.profile.clone(),
                version: current.version + 1,
                ..current
            };

            let persisted = state.aggregate(&updated);
            let actual = checksum(&persisted);
            if actual != pending.expected_checksum {
                return Err(StoreError::ChecksumMismatch {
                    user_id: pending.user_id,
                    expected: pending.expected_checksum,
                    actual,
                });
            }

            let snapshot_id = match pending.snapshot {
                Some(snap) => {
                    let duplicate = state
                        .snapshots
                        .iter()
                        .chain(staged_snapshots.iter())
                        .any(|s| s.operation_id == snap.operation_id && s.user_id == snap.user_id);
                    if duplicate {
                        return Err(StoreError::DuplicateSnapshot {
                            operation_id: snap.operation_id,
                            user_id: snap.user_id,
                        });
                    }
                    let id = state.next_snapshot_id + staged_snapshots.len() as DbId + 1;
                    staged_snapshots.push(materialize(id, snap));
                    Some(id)
                }
                None => None,
            };

            let entry = state.chain_audit(&staged_audit, pending.audit);
            staged_audit.push(entry.clone());
            staged_users.insert(updated.id, updated);
            receipts.push(CommitReceipt {
                user: persisted,
                audit_entry: entry,
                snapshot_id,
            });
        }

        let admins_after = state
            .users
            .values()
            .map(|u| staged_users.get(&u.id).unwrap_or(u))
            .filter(|u| u.role.is_privileged())
            .count();
        let had_admins = state.users.values().any(|u| u.role.is_privileged());
        if had_admins && admins_after == 0 {
            return Err(StoreError::LastAdmin);
        }

        state.next_snapshot_id += staged_snapshots.len() as DbId;
        state.snapshots.extend(staged_snapshots);
        state.audit.extend(staged_audit);
        state.users.extend(staged_users);
        Ok(receipts)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.chain_audit(&[], entry);
        state.audit.push(entry.clone());
        Ok(entry)
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .skip(query.effective_offset() as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }

    async fn audit_chain(&self) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.state.lock().await.audit.clone())
    }

    async fn snapshots_for_operation(&self, operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.operation_id == operation_id)
            .cloned()
            .collect())
    }

    async fn snapshots_for_bulk(&self, bulk_operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.bulk_operation_id == Some(bulk_operation_id))
            .cloned()
            .collect())
    }

    async fn purge_expired_snapshots(&self, now: Timestamp) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.snapshots.len();
        state.snapshots.retain(|s| !s.is_expired(now));
        Ok((before - state.snapshots.len()) as u64)
    }

    async fn save_operation(&self, operation: &MigrationOperation) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .operations
            .insert(operation.id, operation.clone());
        Ok(())
    }

    async fn find_operation(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError> {
        Ok(self.state.lock().await.operations.get(&id).cloned())
    }

    async fn find_rollback_of(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .operations
            .values()
            .filter(|op| op.scope == OperationScope::Rollback && op.reverses == Some(id))
            .max_by_key(|op| op.created_at)
            .cloned())
    }

    async fn referential_probe(&self) -> Result<ReferentialProbe, StoreError> {
        let state = self.state.lock().await;
        let mut probe = ReferentialProbe::default();
        for row in &state.related {
            let (owner, counter) = match row {
                RelatedRow::Order { user_id, .. } => (user_id, &mut probe.orphaned_orders),
                RelatedRow::Donation { user_id, .. } => (user_id, &mut probe.orphaned_donations),
                RelatedRow::LibraryItem { user_id, .. } => (user_id, &mut probe.orphaned_library_items),
                RelatedRow::Bookmark { user_id, .. } => (user_id, &mut probe.orphaned_bookmarks),
            };
            if !state.users.contains_key(owner) {
                *counter += 1;
            }
        }
        let mut seen: HashMap<String, usize> = HashMap::new();
        for user in state.users.values() {
            *seen.entry(user.email.to_ascii_lowercase()).or_default() += 1;
        }
        probe.duplicate_emails = seen.into_iter().filter(|(_, n)| *n > 1).map(|(e, _)| e).collect();
        probe.duplicate_emails.sort();
        Ok(probe)
    }

    async fn save_backup(&self, backup: BackupRecord) -> Result<(), StoreError> {
        self.state.lock().await.backups.insert(backup.id, backup);
        Ok(())
    }

    async fn find_backup(&self, id: uuid::Uuid) -> Result<Option<BackupRecord>, StoreError> {
        Ok(self.state.lock().await.backups.get(&id).cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn materialize(id: DbId, snap: NewSnapshot) -> Snapshot {
    Snapshot {
        id,
        operation_id: snap.operation_id,
        bulk_operation_id: snap.bulk_operation_id,
        user_id: snap.user_id,
        state: snap.state,
        checksum: snap.checksum,
        pre_version: snap.pre_version,
        created_at: snap.created_at,
        expires_at: snap.expires_at,
    }
}
