//! The storage seam used by the migration engine.
//!
//! Every write that changes a user goes through [`MigrationStore::commit`],
//! which applies a compare-and-swap on the user's version and, in the same
//! transaction, enforces the last-admin invariant, persists the snapshot,
//! appends the chained audit entry, and verifies the post-write checksum.

use async_trait::async_trait;
use roleshift_core::audit::{AuditEntry, AuditQuery, NewAuditEntry};
use roleshift_core::error::CoreError;
use roleshift_core::migration::MigrationOperation;
use roleshift_core::roles::Role;
use roleshift_core::snapshot::{NewSnapshot, Snapshot};
use roleshift_core::types::{DbId, OperationId, Timestamp};
use roleshift_core::user::{Preferences, Profile, StructuredField, UserAggregate};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("User {user_id} no longer has version {expected_version}")]
    VersionConflict { user_id: DbId, expected_version: i64 },

    #[error("User {0} not found")]
    UserNotFound(DbId),

    #[error("Commit would leave no admin users")]
    LastAdmin,

    #[error("Checksum mismatch for user {user_id}")]
    ChecksumMismatch {
        user_id: DbId,
        expected: String,
        actual: String,
    },

    #[error("A snapshot already exists for user {user_id} in operation {operation_id}")]
    DuplicateSnapshot { operation_id: OperationId, user_id: DbId },

    #[error("Email {0} is already registered")]
    DuplicateEmail(String),

    #[error("Stored data could not be decoded: {0}")]
    Decode(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict {
                user_id,
                expected_version,
            } => CoreError::ConcurrencyConflict {
                user_id,
                expected_version,
            },
            StoreError::UserNotFound(id) => CoreError::not_found("User", id),
            StoreError::LastAdmin => CoreError::LastAdminProtected,
            StoreError::ChecksumMismatch {
                user_id,
                expected,
                actual,
            } => CoreError::IntegrityCheckFailed {
                user_id,
                expected,
                actual,
            },
            StoreError::DuplicateSnapshot { .. } | StoreError::DuplicateEmail(_) => {
                CoreError::Conflict(err.to_string())
            }
            StoreError::Database(e) => CoreError::Internal(format!("Database error: {e}")),
            StoreError::Decode(msg) => CoreError::Internal(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// A new account, used for seeding and by tests.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub subscription_status: Option<String>,
    pub preferences: StructuredField<Preferences>,
    pub profile: StructuredField<Profile>,
    pub created_at: Option<Timestamp>,
    pub last_login_at: Option<Timestamp>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
            role,
            subscription_status: None,
            preferences: StructuredField::default(),
            profile: StructuredField::default(),
            created_at: None,
            last_login_at: None,
        }
    }
}

/// A row owned by a user in one of the related tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelatedRow {
    Order { user_id: DbId, amount_cents: i64 },
    Donation { user_id: DbId, amount_cents: i64 },
    LibraryItem { user_id: DbId, book_ref: String },
    Bookmark { user_id: DbId, story_ref: String },
}

/// One user write: the full desired state, the version it must replace, and
/// the records that must land atomically with it.
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub user_id: DbId,
    pub expected_version: i64,
    /// Role and repaired fields to persist. `version` and `related` are ignored.
    pub next_state: UserAggregate,
    /// Checksum the persisted row must have after the write.
    pub expected_checksum: String,
    /// Absent for compensating writes.
    pub snapshot: Option<NewSnapshot>,
    pub audit: NewAuditEntry,
}

#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub user: UserAggregate,
    pub audit_entry: AuditEntry,
    pub snapshot_id: Option<DbId>,
}

/// Cross-table consistency counts used by production validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferentialProbe {
    pub orphaned_orders: i64,
    pub orphaned_donations: i64,
    pub orphaned_library_items: i64,
    pub orphaned_bookmarks: i64,
    pub duplicate_emails: Vec<String>,
}

impl ReferentialProbe {
    pub fn orphan_total(&self) -> i64 {
        self.orphaned_orders + self.orphaned_donations + self.orphaned_library_items + self.orphaned_bookmarks
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: uuid::Uuid,
    pub created_at: Timestamp,
    pub checksum: String,
    pub encrypted: bool,
    pub user_count: i64,
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MigrationStore: Send + Sync {
    // -- Users --------------------------------------------------------------

    async fn insert_user(&self, user: NewUser) -> Result<UserAggregate, StoreError>;

    async fn insert_related(&self, row: RelatedRow) -> Result<(), StoreError>;

    async fn find_user(&self, id: DbId) -> Result<Option<UserAggregate>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAggregate>, StoreError>;

    async fn list_users(&self) -> Result<Vec<UserAggregate>, StoreError>;

    async fn list_users_by_role(&self, role: Role) -> Result<Vec<UserAggregate>, StoreError>;

    async fn count_by_role(&self, role: Role) -> Result<i64, StoreError>;

    // -- Writes -------------------------------------------------------------

    /// Apply every commit in one transaction, or none of them.
    async fn commit(&self, commits: Vec<PendingCommit>) -> Result<Vec<CommitReceipt>, StoreError>;

    // -- Audit --------------------------------------------------------------

    /// Append a standalone entry (rejections) to the hash chain.
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError>;

    /// Entries matching `query`, newest first, paginated.
    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError>;

    /// Every entry in append order, for chain verification.
    async fn audit_chain(&self) -> Result<Vec<AuditEntry>, StoreError>;

    // -- Snapshots ----------------------------------------------------------

    async fn snapshots_for_operation(&self, operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError>;

    async fn snapshots_for_bulk(&self, bulk_operation_id: OperationId) -> Result<Vec<Snapshot>, StoreError>;

    /// Delete snapshots whose retention has elapsed. Returns the number removed.
    async fn purge_expired_snapshots(&self, now: Timestamp) -> Result<u64, StoreError>;

    // -- Operations ---------------------------------------------------------

    /// Insert or replace an operation record.
    async fn save_operation(&self, operation: &MigrationOperation) -> Result<(), StoreError>;

    async fn find_operation(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError>;

    /// The most recent rollback operation reversing `id`, if any.
    async fn find_rollback_of(&self, id: OperationId) -> Result<Option<MigrationOperation>, StoreError>;

    // -- Maintenance --------------------------------------------------------

    async fn referential_probe(&self) -> Result<ReferentialProbe, StoreError>;

    async fn save_backup(&self, backup: BackupRecord) -> Result<(), StoreError>;

    async fn find_backup(&self, id: uuid::Uuid) -> Result<Option<BackupRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
