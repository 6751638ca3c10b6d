#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use roleshift_core::audit::{AuditEntry, AuditQuery, NewAuditEntry};
use roleshift_core::migration::MigrationOperation;
use roleshift_core::roles::Role;
use roleshift_core::snapshot::Snapshot;
use roleshift_core::types::{DbId, OperationId, Timestamp};
use roleshift_core::user::UserAggregate;
use roleshift_db::{
    BackupRecord, CommitReceipt, MemoryStore, MigrationStore, NewUser, PendingCommit, ReferentialProbe, RelatedRow,
    StoreError,
};
use roleshift_engine::{Actor, Engine, EngineConfig};
use roleshift_events::{EventBus, NoopNotifier, Notifier, NotifyError, RoleChangeNotice};
use tokio::sync::Barrier;

/// Operator id used by tests. Never a seeded user, so no change counts as
/// self-modification unless a test asks for it.
pub const OPERATOR_ID: DbId = 9_000;

pub fn operator() -> Actor {
    Actor::new(OPERATOR_ID).with_ip("10.0.0.1")
}

pub fn engine(store: Arc<dyn MigrationStore>) -> Engine {
    engine_with(store, EngineConfig::default())
}

pub fn engine_with(store: Arc<dyn MigrationStore>, config: EngineConfig) -> Engine {
    Engine::new(store, Arc::new(NoopNotifier), Arc::new(EventBus::default()), config)
}

pub async fn seed(store: &dyn MigrationStore, email: &str, role: Role) -> UserAggregate {
    store
        .insert_user(NewUser::new(email, "Seeded User", role))
        .await
        .unwrap()
}

/// One admin plus `count` learners. Returns the learners.
pub async fn seed_learners(store: &dyn MigrationStore, count: usize) -> Vec<UserAggregate> {
    seed(store, "admin@example.com", Role::Admin).await;
    let mut learners = Vec::with_capacity(count);
    for i in 0..count {
        learners.push(seed(store, &format!("learner{i}@example.com"), Role::Learner).await);
    }
    learners
}

pub async fn add_orders(store: &dyn MigrationStore, user_id: DbId, amounts: &[i64]) {
    for amount in amounts {
        store
            .insert_related(RelatedRow::Order {
                user_id,
                amount_cents: *amount,
            })
            .await
            .unwrap();
    }
}

pub async fn audit_log(store: &dyn MigrationStore) -> Vec<AuditEntry> {
    store.audit_chain().await.unwrap()
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<RoleChangeNotice>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_role_change(&self, notice: &RoleChangeNotice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Barrier-gated store
// ---------------------------------------------------------------------------

/// Holds the first `parties` user reads until all of them have arrived, so
/// concurrent writers are guaranteed to start from the same version.
pub struct GatedStore {
    inner: MemoryStore,
    barrier: Barrier,
    parties: usize,
    arrived: AtomicUsize,
}

impl GatedStore {
    pub fn new(inner: MemoryStore, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            parties,
            arrived: AtomicUsize::new(0),
        }
    }

    async fn gate(&self) {
        if self.arrived.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait().await;
        }
    }
}

#[async_trait]
impl MigrationStore for GatedStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserAggregate, StoreError> {
        self.inner.insert_user(user).await
    }

    async fn insert_related(&self, row: RelatedRow) -> Result<(), StoreError> {
        self.inner.insert_related(row).await
    }

    async fn find_user(&self, id: DbId) -> Result<Option<UserAggregate>, StoreError> {
        let found = self.inner.find_user(id).await;
        self.gate().await;
        found
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAggregate>, StoreError> {
        self.inner.find_user_by_email(email).await
    }

    async fn list_users(&self) -> Result<Vec<UserAggregate>, StoreError> {
        self.inner.list_users().await
    }

    async fn list_users_by_role(&self, role: Role) -> Result<Vec<UserAggregate>, StoreError> {
        self.inner.list_users_by_role(role).await
    }

    async fn count_by_role(&self, role: Role) -> Result<i64, StoreError> {
        self.inner.count_by_role(role).await
    }

    async fn commit(&self, commits: Vec<PendingCommit>) -> Result<Vec<CommitReceipt>, StoreError> {
        self.inner.commit(commits).await
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        self.inner.append_audit(entry).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.query_audit(query).await
    }

    async fn audit_chain(&self) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.audit_chain().await
    }

    async fn snapshots_for_operation(&self, operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.snapshots_for_operation(operation_id).await
    }

    async fn snapshots_for_bulk(&self, bulk_operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.snapshots_for_bulk(bulk_operation_id).await
    }

    async fn purge_expired_snapshots(&self, now: Timestamp) -> Result<u64, StoreError> {
        self.inner.purge_expired_snapshots(now).await
    }

    async fn save_operation(&self, operation: &MigrationOperation) -> Result<(), StoreError> {
        self.inner.save_operation(operation).await
    }

    async fn find_operation(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError> {
        self.inner.find_operation(id).await
    }

    async fn find_rollback_of(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError> {
        self.inner.find_rollback_of(id).await
    }

    async fn referential_probe(&self) -> Result<ReferentialProbe, StoreError> {
        self.inner.referential_probe().await
    }

    async fn save_backup(&self, backup: BackupRecord) -> Result<(), StoreError> {
        self.inner.save_backup(backup).await
    }

    async fn find_backup(&self, id: uuid::Uuid) -> Result<Option<BackupRecord>, StoreError> {
        self.inner.find_backup(id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

// ---------------------------------------------------------------------------
// Slow-closing store
// ---------------------------------------------------------------------------

/// Adds `latency` to every save of a finished operation, widening the gap
/// between a batch's last item and its operation row landing.
pub struct SlowCloseStore {
    inner: MemoryStore,
    latency: Duration,
}

impl SlowCloseStore {
    pub fn new(inner: MemoryStore, latency: Duration) -> Self {
        Self { inner, latency }
    }
}

#[async_trait]
impl MigrationStore for SlowCloseStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserAggregate, StoreError> {
        self.inner.insert_user(user).await
    }

    async fn insert_related(&self, row: RelatedRow) -> Result<(), StoreError> {
        self.inner.insert_related(row).await
    }

    async fn find_user(&self, id: DbId) -> Result<Option<UserAggregate>, StoreError> {
        self.inner.find_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAggregate>, StoreError> {
        self.inner.find_user_by_email(email).await
    }

    async fn list_users(&self) -> Result<Vec<UserAggregate>, StoreError> {
        self.inner.list_users().await
    }

    async fn list_users_by_role(&self, role: Role) -> Result<Vec<UserAggregate>, StoreError> {
        self.inner.list_users_by_role(role).await
    }

    async fn count_by_role(&self, role: Role) -> Result<i64, StoreError> {
        self.inner.count_by_role(role).await
    }

    async fn commit(&self, commits: Vec<PendingCommit>) -> Result<Vec<CommitReceipt>, StoreError> {
        self.inner.commit(commits).await
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        self.inner.append_audit(entry).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.query_audit(query).await
    }

    async fn audit_chain(&self) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.audit_chain().await
    }

    async fn snapshots_for_operation(&self, operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.snapshots_for_operation(operation_id).await
    }

    async fn snapshots_for_bulk(&self, bulk_operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.snapshots_for_bulk(bulk_operation_id).await
    }

    async fn purge_expired_snapshots(&self, now: Timestamp) -> Result<u64, StoreError> {
        self.inner.purge_expired_snapshots(now).await
    }

    async fn save_operation(&self, operation: &MigrationOperation) -> Result<(), StoreError> {
        if operation.status.is_terminal() {
            tokio::time::sleep(self.latency).await;
        }
        self.inner.save_operation(operation).await
    }

    async fn find_operation(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError> {
        self.inner.find_operation(id).await
    }

    async fn find_rollback_of(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError> {
        self.inner.find_rollback_of(id).await
    }

    async fn referential_probe(&self) -> Result<ReferentialProbe, StoreError> {
        self.inner.referential_probe().await
    }

    async fn save_backup(&self, backup: BackupRecord) -> Result<(), StoreError> {
        self.inner.save_backup(backup).await
    }

    async fn find_backup(&self, id: uuid::Uuid) -> Result<Option<BackupRecord>, StoreError> {
        self.inner.find_backup(id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}
