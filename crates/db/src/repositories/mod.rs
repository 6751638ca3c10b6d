//! Repository layer: one zero-sized struct per table, each method taking any
//! PostgreSQL executor so it can run on the pool or inside a transaction.

pub mod audit_repo;
pub mod backup_repo;
pub mod operation_repo;
pub mod related_repo;
pub mod snapshot_repo;
pub mod user_repo;

pub use audit_repo::RoleAuditRepo;
pub use backup_repo::BackupRepo;
pub use operation_repo::OperationRepo;
pub use related_repo::RelatedRepo;
pub use snapshot_repo::SnapshotRepo;
pub use user_repo::UserRepo;
