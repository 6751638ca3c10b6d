mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use roleshift_core::audit::AuditQuery;
use roleshift_core::error::CoreError;
use roleshift_core::governor::GovernorLimits;
use roleshift_core::migration::OperationStatus;
use roleshift_core::roles::Role;
use roleshift_db::{MemoryStore, MigrationStore, NewUser};
use roleshift_engine::batch::USER_NOT_FOUND;
use roleshift_engine::{
    BatchOptions, BatchReport, BatchRequest, BatchSelector, Engine, EngineConfig, ItemStatus, OperationReport, UserRef,
};

use common::{audit_log, engine, engine_with, operator, seed, seed_learners, SlowCloseStore};

fn from_role(from: &str, to: &str, options: BatchOptions) -> BatchRequest {
    BatchRequest {
        selector: BatchSelector::FromRole {
            from_role: from.into(),
            to_role: to.into(),
        },
        reason: Some("Role system v2".into()),
        options,
    }
}

fn explicit(users: Vec<UserRef>, to: &str, options: BatchOptions) -> BatchRequest {
    BatchRequest {
        selector: BatchSelector::Explicit {
            users,
            new_role: to.into(),
        },
        reason: Some("Cleanup".into()),
        options,
    }
}

async fn run(engine: &Engine, req: BatchRequest) -> BatchReport {
    match engine.executor.run_batch(req, operator()).await.unwrap() {
        OperationReport::Batch(report) => report,
        OperationReport::DryRun(_) => panic!("expected a batch report"),
    }
}

async fn wait_for_report(engine: &Engine, operation_id: uuid::Uuid) -> BatchReport {
    for _ in 0..200 {
        if let Ok(OperationReport::Batch(report)) = engine.operation_report(operation_id).await {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch {operation_id} did not finish");
}

#[tokio::test]
async fn fifty_users_in_parallel_chunks() {
    let store = Arc::new(MemoryStore::new());
    seed_learners(store.as_ref(), 50).await;
    let engine = engine(store.clone());

    let report = run(
        &engine,
        from_role(
            "LEARNER",
            "CUSTOMER",
            BatchOptions {
                chunk_size: Some(10),
                parallel: true,
                ..Default::default()
            },
        ),
    )
    .await;

    assert_eq!(report.status, OperationStatus::Completed);
    assert_eq!(report.total_users, 50);
    assert_eq!(report.migrated, 50);
    assert_eq!(report.failed, 0);
    assert_eq!(report.chunks, 5);
    assert!(report.within_time_ceiling);
    assert!(report.average_ms_per_user < 100.0);
    assert_eq!(store.count_by_role(Role::Customer).await.unwrap(), 50);

    let progress = engine.tracker.get(report.bulk_operation_id).await.unwrap();
    assert_eq!(progress.processed, progress.total);
    assert_eq!(progress.status, OperationStatus::Completed);

    let by_batch = AuditQuery {
        bulk_operation_id: Some(report.bulk_operation_id),
        ..Default::default()
    };
    assert_eq!(engine.audit.query(&by_batch).await.unwrap().len(), 50);

    let resources = engine.governor.report();
    assert_eq!(resources.chunks_dispatched, 5);
    assert!(resources.peak_concurrent_chunks <= resources.limits.max_concurrency);
    assert!(!resources.ceiling_exceeded);
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 3).await;
    let engine = engine(store.clone());

    let report = engine
        .executor
        .run_batch(
            from_role(
                "LEARNER",
                "CUSTOMER",
                BatchOptions {
                    dry_run: true,
                    ..Default::default()
                },
            ),
            operator(),
        )
        .await
        .unwrap();

    let OperationReport::DryRun(dry) = report else {
        panic!("expected a dry run report");
    };
    assert!(dry.dry_run);
    assert_eq!(dry.would_migrate, 3);
    assert_eq!(dry.would_fail, 0);
    for learner in &learners {
        let current = store.find_user(learner.id).await.unwrap().unwrap();
        assert_eq!(current.role, Role::Learner);
        assert_eq!(current.version, learner.version);
    }
    assert!(audit_log(store.as_ref()).await.is_empty());
}

#[tokio::test]
async fn dry_run_reports_last_admin_issue() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), "a1@example.com", Role::Admin).await;
    seed(store.as_ref(), "a2@example.com", Role::Admin).await;
    let engine = engine(store.clone());

    let plan = engine
        .executor
        .plan_batch(from_role("ADMIN", "CUSTOMER", BatchOptions::default()))
        .await
        .unwrap();
    let dry = engine.executor.dry_run(&plan, &operator()).await.unwrap();
    assert_eq!(dry.would_migrate, 1);
    assert_eq!(dry.would_fail, 1);
    assert!(dry.potential_issues[0].issue.contains("last admin"));
}

#[tokio::test]
async fn missing_users_become_item_errors_with_continue_on_error() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 2).await;
    let engine = engine(store.clone());

    let report = run(
        &engine,
        explicit(
            vec![
                UserRef::Id(learners[0].id),
                UserRef::Email("ghost@example.com".into()),
                UserRef::Email(learners[1].email.clone()),
            ],
            "CUSTOMER",
            BatchOptions {
                continue_on_error: true,
                ..Default::default()
            },
        ),
    )
    .await;

    assert_eq!(report.status, OperationStatus::PartialSuccess);
    assert_eq!(report.total_users, 3);
    assert_eq!(report.migrated, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].error, USER_NOT_FOUND);
    assert_eq!(report.errors[0].email.as_deref(), Some("ghost@example.com"));
    assert_matches!(report.failure(), Some(CoreError::PartialBatchFailure { total: 3, failed: 1 }));
}

#[tokio::test]
async fn missing_user_aborts_batch_without_continue_on_error() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 2).await;
    let engine = engine(store.clone());

    let report = run(
        &engine,
        explicit(
            vec![UserRef::Id(learners[0].id), UserRef::Id(404), UserRef::Id(learners[1].id)],
            "CUSTOMER",
            BatchOptions::default(),
        ),
    )
    .await;

    assert_eq!(report.status, OperationStatus::Failed);
    assert_eq!(report.migrated, 0);
    assert_eq!(report.not_attempted, 2);
    assert_eq!(store.count_by_role(Role::Customer).await.unwrap(), 0);
}

#[tokio::test]
async fn users_already_holding_the_role_are_skipped() {
    let store = Arc::new(MemoryStore::new());
    let learners = seed_learners(store.as_ref(), 1).await;
    let customer = seed(store.as_ref(), "customer@example.com", Role::Customer).await;
    let engine = engine(store.clone());

    let report = run(
        &engine,
        explicit(
            vec![UserRef::Id(learners[0].id), UserRef::Id(customer.id), UserRef::Id(customer.id)],
            "CUSTOMER",
            BatchOptions::default(),
        ),
    )
    .await;

    assert_eq!(report.status, OperationStatus::Completed);
    assert_eq!(report.total_users, 1);
    assert_eq!(report.migrated, 1);
    assert_eq!(report.skipped, 1);
    let skipped = report
        .results
        .iter()
        .find(|r| r.status == ItemStatus::Skipped)
        .unwrap();
    assert_eq!(skipped.user_id, Some(customer.id));
}

#[tokio::test]
async fn atomic_chunk_fails_as_a_unit() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), "admin@example.com", Role::Admin).await;
    seed(store.as_ref(), "ok1@example.com", Role::Learner).await;
    let mut corrupt = NewUser::new("broken@example.com", "x", Role::Learner);
    corrupt.name = None;
    store.insert_user(corrupt).await.unwrap();
    seed(store.as_ref(), "ok2@example.com", Role::Learner).await;
    seed(store.as_ref(), "ok3@example.com", Role::Learner).await;
    let engine = engine(store.clone());

    let report = run(
        &engine,
        from_role(
            "LEARNER",
            "CUSTOMER",
            BatchOptions {
                chunk_size: Some(2),
                atomic_transaction: true,
                continue_on_error: true,
                ..Default::default()
            },
        ),
    )
    .await;

    assert_eq!(report.status, OperationStatus::PartialSuccess);
    assert_eq!(report.migrated, 2);
    assert_eq!(report.failed, 2);
    let ok1 = store.find_user_by_email("ok1@example.com").await.unwrap().unwrap();
    assert_eq!(ok1.role, Role::Learner, "chunk-mate of a failed user must not be written");
    let rolled_back = report
        .errors
        .iter()
        .find(|e| e.email.as_deref() == Some("ok1@example.com"))
        .unwrap();
    assert!(rolled_back.error.contains("Chunk rolled back"));
}

#[tokio::test]
async fn itemwise_chunk_isolates_failures() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), "admin@example.com", Role::Admin).await;
    seed(store.as_ref(), "ok1@example.com", Role::Learner).await;
    let mut corrupt = NewUser::new("broken@example.com", "x", Role::Learner);
    corrupt.name = None;
    store.insert_user(corrupt).await.unwrap();
    seed(store.as_ref(), "ok2@example.com", Role::Learner).await;
    let engine = engine(store.clone());

    let report = run(
        &engine,
        from_role(
            "LEARNER",
            "CUSTOMER",
            BatchOptions {
                chunk_size: Some(2),
                continue_on_error: true,
                ..Default::default()
            },
        ),
    )
    .await;

    assert_eq!(report.migrated, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].code, "CORRUPTION_DETECTED");
}

#[tokio::test]
async fn batch_never_removes_the_last_admin() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), "a1@example.com", Role::Admin).await;
    seed(store.as_ref(), "a2@example.com", Role::Admin).await;
    let engine = engine(store.clone());

    let report = run(
        &engine,
        from_role(
            "ADMIN",
            "CUSTOMER",
            BatchOptions {
                continue_on_error: true,
                ..Default::default()
            },
        ),
    )
    .await;

    assert_eq!(report.migrated, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].code, "LAST_ADMIN_PROTECTED");
    assert_eq!(store.count_by_role(Role::Admin).await.unwrap(), 1);
}

#[tokio::test]
async fn identical_roles_and_empty_lists_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store);

    assert_matches!(
        engine
            .executor
            .plan_batch(from_role("LEARNER", "learner", BatchOptions::default()))
            .await,
        Err(CoreError::Validation(_))
    );
    assert_matches!(
        engine
            .executor
            .plan_batch(explicit(Vec::new(), "CUSTOMER", BatchOptions::default()))
            .await,
        Err(CoreError::Validation(_))
    );
    assert_matches!(
        engine
            .executor
            .plan_batch(from_role("LEARNER", "NOPE", BatchOptions::default()))
            .await,
        Err(CoreError::InvalidRole(_))
    );
}

#[tokio::test]
async fn oversized_batch_is_refused() {
    let store = Arc::new(MemoryStore::new());
    seed_learners(store.as_ref(), 3).await;
    let config = EngineConfig {
        limits: GovernorLimits {
            max_batch_users: 2,
            ..GovernorLimits::default()
        },
        ..EngineConfig::default()
    };
    let engine = engine_with(store, config);

    assert_matches!(
        engine
            .executor
            .plan_batch(from_role("LEARNER", "CUSTOMER", BatchOptions::default()))
            .await,
        Err(CoreError::ResourceLimitExceeded(_))
    );
}

#[tokio::test]
async fn async_batch_progress_is_monotonic() {
    let store = Arc::new(MemoryStore::new());
    seed_learners(store.as_ref(), 20).await;
    let config = EngineConfig {
        limits: GovernorLimits {
            throttle_interval_ms: 20,
            ..GovernorLimits::default()
        },
        ..EngineConfig::default()
    };
    let engine = engine_with(store.clone(), config);

    let operation_id = engine
        .executor
        .start_batch(
            from_role(
                "LEARNER",
                "CUSTOMER",
                BatchOptions {
                    chunk_size: Some(5),
                    throttle: true,
                    ..Default::default()
                },
            ),
            operator(),
        )
        .await
        .unwrap();

    let mut last_processed = 0;
    loop {
        let record = engine.tracker.get(operation_id).await.unwrap();
        assert!(record.processed >= last_processed);
        last_processed = record.processed;
        if record.status.is_terminal() {
            assert_eq!(record.status, OperationStatus::Completed);
            assert_eq!(record.processed, record.total);
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let report = wait_for_report(&engine, operation_id).await;
    assert_eq!(report.migrated, 20);
    assert!(engine.governor.report().throttle_waits >= 3);
}

#[tokio::test]
async fn parallel_throttled_chunks_are_spaced_apart() {
    let store = Arc::new(MemoryStore::new());
    seed_learners(store.as_ref(), 4).await;
    let config = EngineConfig {
        limits: GovernorLimits {
            max_concurrency: 4,
            throttle_interval_ms: 200,
            ..GovernorLimits::default()
        },
        ..EngineConfig::default()
    };
    let engine = engine_with(store.clone(), config);

    let started = std::time::Instant::now();
    let report = run(
        &engine,
        from_role(
            "LEARNER",
            "CUSTOMER",
            BatchOptions {
                chunk_size: Some(1),
                parallel: true,
                throttle: true,
                ..Default::default()
            },
        ),
    )
    .await;

    assert_eq!(report.status, OperationStatus::Completed);
    assert_eq!(report.chunks, 4);
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(engine.governor.report().throttle_waits, 3);
}

#[tokio::test]
async fn terminal_batch_is_immediately_reportable_and_reversible() {
    let store = Arc::new(SlowCloseStore::new(MemoryStore::new(), Duration::from_millis(300)));
    seed_learners(store.as_ref(), 3).await;
    let engine = engine(store.clone());

    let operation_id = engine
        .executor
        .start_batch(from_role("LEARNER", "CUSTOMER", BatchOptions::default()), operator())
        .await
        .unwrap();

    let mut saw_running = false;
    loop {
        let record = engine.tracker.get(operation_id).await.unwrap();
        if record.status.is_terminal() {
            assert_eq!(record.status, OperationStatus::Completed);
            assert_eq!(record.processed, record.total);
            break;
        }
        assert!(record.processed < record.total);
        saw_running = true;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(saw_running);

    assert_matches!(
        engine.operation_report(operation_id).await,
        Ok(OperationReport::Batch(report)) if report.migrated == 3
    );
    let rollback = engine
        .rollback
        .rollback_batch(operation_id, true, &operator())
        .await
        .unwrap();
    assert_eq!(rollback.rolled_back_users.len(), 3);
    assert_eq!(store.count_by_role(Role::Learner).await.unwrap(), 3);
}

#[tokio::test]
async fn cancelled_batch_skips_undispatched_chunks() {
    let store = Arc::new(MemoryStore::new());
    seed_learners(store.as_ref(), 10).await;
    let config = EngineConfig {
        limits: GovernorLimits {
            throttle_interval_ms: 200,
            ..GovernorLimits::default()
        },
        ..EngineConfig::default()
    };
    let engine = engine_with(store.clone(), config);

    let operation_id = engine
        .executor
        .start_batch(
            from_role(
                "LEARNER",
                "CUSTOMER",
                BatchOptions {
                    chunk_size: Some(2),
                    throttle: true,
                    ..Default::default()
                },
            ),
            operator(),
        )
        .await
        .unwrap();
    engine.tracker.cancel(operation_id).await.unwrap();

    let report = wait_for_report(&engine, operation_id).await;
    assert_eq!(report.status, OperationStatus::Cancelled);
    assert!(report.migrated <= 2);
    assert_eq!(report.migrated + report.not_attempted, 10);
    assert_eq!(
        store.count_by_role(Role::Customer).await.unwrap(),
        report.migrated as i64
    );

    let record = engine.tracker.get(operation_id).await.unwrap();
    assert_eq!(record.status, OperationStatus::Cancelled);
    assert_matches!(engine.tracker.cancel(operation_id).await, Err(CoreError::Conflict(_)));
}

#[tokio::test]
async fn async_dry_run_stores_its_report() {
    let store = Arc::new(MemoryStore::new());
    seed_learners(store.as_ref(), 4).await;
    let engine = engine(store.clone());

    let operation_id = engine
        .executor
        .start_batch(
            from_role(
                "LEARNER",
                "CUSTOMER",
                BatchOptions {
                    dry_run: true,
                    ..Default::default()
                },
            ),
            operator(),
        )
        .await
        .unwrap();

    assert_matches!(
        engine.operation_report(operation_id).await.unwrap(),
        OperationReport::DryRun(dry) if dry.would_migrate == 4
    );
    assert_eq!(store.count_by_role(Role::Customer).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let engine = engine(Arc::new(MemoryStore::new()));
    let id = uuid::Uuid::now_v7();
    assert_matches!(engine.operation_status(id).await, Err(CoreError::NotFound { .. }));
    assert_matches!(engine.operation_report(id).await, Err(CoreError::NotFound { .. }));
    assert_matches!(engine.tracker.cancel(id).await, Err(CoreError::NotFound { .. }));
}
