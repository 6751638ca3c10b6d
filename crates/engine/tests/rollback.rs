mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use roleshift_core::audit::AuditAction;
use roleshift_core::checksum::checksum;
use roleshift_core::error::CoreError;
use roleshift_core::migration::OperationStatus;
use roleshift_core::roles::Role;
use roleshift_core::snapshot::RetentionPolicy;
use roleshift_core::user::UserAggregate;
use roleshift_db::{MemoryStore, MigrationStore};
use roleshift_engine::retention::purge_once;
use roleshift_engine::{
    AssignRoleRequest, BatchOptions, BatchReport, BatchRequest, BatchSelector, Engine, EngineConfig, OperationReport,
    UserRef,
};

use common::{audit_log, engine, engine_with, operator, seed_learners};

async fn migrate_all(engine: &Engine) -> BatchReport {
    let req = BatchRequest {
        selector: BatchSelector::FromRole {
            from_role: "LEARNER".into(),
            to_role: "CUSTOMER".into(),
        },
        reason: Some("Role system v2".into()),
        options: BatchOptions {
            chunk_size: Some(2),
            ..Default::default()
        },
    };
    match engine.executor.run_batch(req, operator()).await.unwrap() {
        OperationReport::Batch(report) => report,
        OperationReport::DryRun(_) => panic!("expected a batch report"),
    }
}

async fn reload(store: &dyn MigrationStore, user: &UserAggregate) -> UserAggregate {
    store.find_user(user.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn batch_rollback_restores_every_user() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 5).await;
    let engine = engine(store.clone());
    let batch = migrate_all(&engine).await;
    assert_eq!(batch.migrated, 5);

    let report = engine
        .rollback
        .rollback_batch(batch.bulk_operation_id, true, &operator())
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.rolled_back_users.len(), 5);
    assert_eq!(report.failed_rollbacks, 0);

    for learner in &learners {
        let current = reload(store.as_ref(), learner).await;
        assert_eq!(current.role, Role::Learner);
        assert_eq!(checksum(&current), checksum(learner));
    }

    // Rollback entries reference the migration they reverse.
    let log = audit_log(store.as_ref()).await;
    let reversals: Vec<_> = log
        .iter()
        .filter(|e| e.rollback_of == Some(batch.bulk_operation_id))
        .collect();
    assert_eq!(reversals.len(), 5);
    assert!(reversals.iter().all(|e| e.action == AuditAction::RoleChange));
    assert!(reversals
        .iter()
        .all(|e| e.bulk_operation_id == Some(report.rollback_operation_id)));

    assert_matches!(
        engine.store.find_operation(batch.bulk_operation_id).await.unwrap(),
        Some(op) if op.status == OperationStatus::Completed
    );
    let rollback_op = engine
        .store
        .find_operation(report.rollback_operation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rollback_op.reverses, Some(batch.bulk_operation_id));
    assert_eq!(rollback_op.status, OperationStatus::Completed);
}

#[tokio::test]
async fn atomic_rollback_writes_nothing_when_one_user_changed_since() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 3).await;
    let engine = engine(store.clone());
    let batch = migrate_all(&engine).await;

    // A later change supersedes the snapshot for one user.
    engine
        .executor
        .assign_role(AssignRoleRequest::new(UserRef::Id(learners[1].id), "TEACHER"), &operator())
        .await
        .unwrap();

    let report = engine
        .rollback
        .rollback_batch(batch.bulk_operation_id, true, &operator())
        .await
        .unwrap();
    assert!(!report.success);
    assert!(!report.partial_success);
    assert!(report.rolled_back_users.is_empty());
    assert_eq!(report.failed_rollbacks, 3);
    assert!(report.errors.iter().all(|e| e.code == "ROLLBACK_UNAVAILABLE"));

    assert_eq!(reload(store.as_ref(), &learners[0]).await.role, Role::Customer);
    assert_eq!(reload(store.as_ref(), &learners[1]).await.role, Role::Teacher);
    assert_eq!(reload(store.as_ref(), &learners[2]).await.role, Role::Customer);

    // A failed rollback leaves the original reversible.
    let original = engine
        .store
        .find_operation(batch.bulk_operation_id)
        .await
        .unwrap()
        .unwrap();
    let failed_rollback = engine
        .store
        .find_rollback_of(batch.bulk_operation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed_rollback.status, OperationStatus::Failed);
    assert_eq!(
        original.effective_status(Some(&failed_rollback)),
        OperationStatus::Completed
    );
}

#[tokio::test]
async fn partial_rollback_restores_what_it_can() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 3).await;
    let engine = engine(store.clone());
    let batch = migrate_all(&engine).await;

    engine
        .executor
        .assign_role(AssignRoleRequest::new(UserRef::Id(learners[1].id), "TEACHER"), &operator())
        .await
        .unwrap();

    let report = engine
        .rollback
        .rollback_batch(batch.bulk_operation_id, false, &operator())
        .await
        .unwrap();
    assert!(!report.success);
    assert!(report.partial_success);
    assert_eq!(report.rolled_back_users, vec![learners[0].id, learners[2].id]);
    assert_eq!(report.failed_rollbacks, 1);
    assert_eq!(report.errors[0].user_id, Some(learners[1].id));
    assert_eq!(report.errors[0].code, "ROLLBACK_UNAVAILABLE");

    assert_eq!(reload(store.as_ref(), &learners[0]).await.role, Role::Learner);
    assert_eq!(reload(store.as_ref(), &learners[1]).await.role, Role::Teacher);

    let rejected = audit_log(store.as_ref())
        .await
        .into_iter()
        .filter(|e| e.action == AuditAction::RoleChangeRejected && e.rollback_of == Some(batch.bulk_operation_id))
        .count();
    assert_eq!(rejected, 1);
}

#[tokio::test]
async fn batch_rollback_requires_a_batch_operation() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 1).await;
    let engine = engine(store.clone());
    let single = engine
        .executor
        .assign_role(AssignRoleRequest::new(UserRef::Id(learners[0].id), "CUSTOMER"), &operator())
        .await
        .unwrap();

    assert_matches!(
        engine
            .rollback
            .rollback_batch(single.operation_id, true, &operator())
            .await,
        Err(CoreError::Validation(_))
    );
    assert_matches!(
        engine
            .rollback
            .rollback_operation(uuid::Uuid::now_v7(), &operator())
            .await,
        Err(CoreError::NotFound { .. })
    );
}

#[tokio::test]
async fn expired_snapshot_cannot_be_restored() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 1).await;
    let config = EngineConfig {
        retention: RetentionPolicy { days: 0 },
        ..EngineConfig::default()
    };
    let engine = engine_with(store.clone(), config);
    let migrated = engine
        .executor
        .assign_role(AssignRoleRequest::new(UserRef::Id(learners[0].id), "CUSTOMER"), &operator())
        .await
        .unwrap();

    assert_matches!(
        engine
            .rollback
            .rollback_operation(migrated.operation_id, &operator())
            .await,
        Err(CoreError::RollbackUnavailable(msg)) if msg.contains("expired")
    );
    assert_eq!(reload(store.as_ref(), &learners[0]).await.role, Role::Customer);

    // Once purged, there is nothing left to restore from.
    let (deleted, _) = purge_once(store.as_ref(), &engine.tracker).await;
    assert_eq!(deleted, 1);
    assert_matches!(
        engine
            .rollback
            .rollback_operation(migrated.operation_id, &operator())
            .await,
        Err(CoreError::RollbackUnavailable(msg)) if msg.contains("No snapshots")
    );
}

#[tokio::test]
async fn rollback_cannot_be_rolled_back() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 1).await;
    let engine = engine(store.clone());
    let migrated = engine
        .executor
        .assign_role(AssignRoleRequest::new(UserRef::Id(learners[0].id), "CUSTOMER"), &operator())
        .await
        .unwrap();
    let report = engine
        .rollback
        .rollback_operation(migrated.operation_id, &operator())
        .await
        .unwrap();

    assert_matches!(
        engine
            .rollback
            .rollback_operation(report.rollback_operation_id, &operator())
            .await,
        Err(CoreError::RollbackUnavailable(_))
    );
}
