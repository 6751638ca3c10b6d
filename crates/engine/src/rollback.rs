//! Reversing migrations from their snapshots.
//!
//! A rollback is its own operation: it gets a fresh id, references the
//! migration it reverses through `reverses`, and writes through the same
//! versioned commit path as the migration did. The original operation record
//! is never modified; its `rolled_back` status is derived from the rollback.

use chrono::Utc;
use roleshift_core::audit::NewAuditEntry;
use roleshift_core::checksum::checksum;
use roleshift_core::error::CoreError;
use roleshift_core::integrity::CorruptionMode;
use roleshift_core::migration::{MigrationOperation, OperationScope, OperationStatus};
use roleshift_core::snapshot::Snapshot;
use roleshift_core::types::{DbId, OperationId};
use roleshift_core::user::UserAggregate;
use roleshift_db::PendingCommit;
use roleshift_events::{event_types, MigrationEvent};
use serde::Serialize;
use uuid::Uuid;

use crate::batch::ItemError;
use crate::executor::{Actor, ChangeScope, MigrationExecutor, RejectedTarget};

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub rollback_operation_id: OperationId,
    pub reverses: OperationId,
    pub success: bool,
    pub partial_success: bool,
    pub rolled_back_users: Vec<DbId>,
    pub failed_rollbacks: usize,
    pub errors: Vec<ItemError>,
    pub integrity_verified: bool,
}

#[derive(Clone)]
pub struct RollbackCoordinator {
    executor: MigrationExecutor,
}

impl RollbackCoordinator {
    pub fn new(executor: MigrationExecutor) -> Self {
        Self { executor }
    }

    /// Reverse one migration. Batch migrations are reversed all-or-nothing;
    /// a single-user migration that cannot be restored returns the error.
    pub async fn rollback_operation(&self, operation_id: OperationId, actor: &Actor) -> Result<RollbackReport, CoreError> {
        let original = self.load_reversible(operation_id).await?;
        if original.scope == OperationScope::Batch {
            return self.restore(&original, true, actor).await.map(|(report, _)| report);
        }

        let (report, first_error) = self.restore(&original, true, actor).await?;
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Reverse every user touched by a batch. Without `atomic`, users that
    /// can be restored are, and the rest are reported individually.
    pub async fn rollback_batch(
        &self,
        bulk_operation_id: OperationId,
        atomic: bool,
        actor: &Actor,
    ) -> Result<RollbackReport, CoreError> {
        let original = self.load_reversible(bulk_operation_id).await?;
        if original.scope != OperationScope::Batch {
            return Err(CoreError::Validation(format!(
                "Operation {bulk_operation_id} is not a batch migration"
            )));
        }
        self.restore(&original, atomic, actor).await.map(|(report, _)| report)
    }

    async fn load_reversible(&self, operation_id: OperationId) -> Result<MigrationOperation, CoreError> {
        let store = &self.executor.store;
        let original = store
            .find_operation(operation_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Migration", operation_id))?;

        if original.scope == OperationScope::Rollback {
            return Err(CoreError::RollbackUnavailable(
                "A rollback cannot itself be rolled back".into(),
            ));
        }
        if !original.status.is_terminal() {
            return Err(CoreError::RollbackUnavailable(format!(
                "Migration {operation_id} is still {}",
                original.status.as_str()
            )));
        }
        if let Some(previous) = store.find_rollback_of(operation_id).await? {
            if previous.status == OperationStatus::Completed {
                return Err(CoreError::RollbackUnavailable(format!(
                    "Migration {operation_id} has already been rolled back"
                )));
            }
        }
        Ok(original)
    }

    async fn restore(
        &self,
        original: &MigrationOperation,
        atomic: bool,
        actor: &Actor,
    ) -> Result<(RollbackReport, Option<CoreError>), CoreError> {
        let store = &self.executor.store;
        let snapshots = match original.scope {
            OperationScope::Batch => store.snapshots_for_bulk(original.id).await?,
            _ => store.snapshots_for_operation(original.id).await?,
        };
        if snapshots.is_empty() {
            return Err(CoreError::RollbackUnavailable(format!(
                "No snapshots are available for migration {}",
                original.id
            )));
        }

        let now = Utc::now();
        let rollback_id = Uuid::now_v7();
        let reason = format!("Rollback of migration {}", original.id);
        let mut operation = MigrationOperation::new(rollback_id, OperationScope::Rollback, actor.user_id, now);
        operation.reverses = Some(original.id);
        operation.from_role = original.to_role;
        operation.to_role = original.from_role;
        operation.target_user_ids = snapshots.iter().map(|s| s.user_id).collect();
        operation.reason = Some(reason.clone());
        operation.transition(OperationStatus::Running, now)?;
        self.executor.save_operation(&operation).await;

        let scope = ChangeScope {
            operation_id: rollback_id,
            bulk_operation_id: (original.scope == OperationScope::Batch).then_some(rollback_id),
            rollback_of: Some(original.id),
            actor,
            reason: Some(&reason),
            corruption_mode: CorruptionMode::Abort,
            confirm_self_modification: true,
        };

        tracing::info!(
            rollback_id = %rollback_id,
            reverses = %original.id,
            users = snapshots.len(),
            atomic,
            "Rollback started",
        );

        let mut rolled_back_users = Vec::new();
        let mut failures: Vec<(ItemError, CoreError)> = Vec::new();

        if atomic {
            let mut commits = Vec::with_capacity(snapshots.len());
            let mut prepared_users = Vec::with_capacity(snapshots.len());
            for snapshot in &snapshots {
                match self.prepare(snapshot, &scope).await {
                    Ok((current, commit)) => {
                        prepared_users.push(current);
                        commits.push(commit);
                    }
                    Err((current, err)) => {
                        let item = self.record_failure(snapshot, current.as_ref(), &err, &scope).await;
                        failures.push((item, err));
                    }
                }
            }

            if failures.is_empty() {
                if let Err(e) = store.commit(commits).await {
                    let err = CoreError::from(e);
                    for (snapshot, current) in snapshots.iter().zip(&prepared_users) {
                        let item = self.record_failure(snapshot, Some(current), &err, &scope).await;
                        failures.push((item, err.clone()));
                    }
                } else {
                    rolled_back_users = prepared_users.iter().map(|u| u.id).collect();
                }
            } else {
                // Nothing is written; every remaining user is reported as not restored.
                let blocked = CoreError::RollbackUnavailable(format!(
                    "Atomic rollback aborted: {}",
                    failures[0].1
                ));
                for current in &prepared_users {
                    if let Some(snapshot) = snapshots.iter().find(|s| s.user_id == current.id) {
                        let item = self.record_failure(snapshot, Some(current), &blocked, &scope).await;
                        failures.push((item, blocked.clone()));
                    }
                }
            }
        } else {
            for snapshot in &snapshots {
                let outcome = match self.prepare(snapshot, &scope).await {
                    Ok((current, commit)) => store
                        .commit(vec![commit])
                        .await
                        .map(|_| current.id)
                        .map_err(|e| (Some(current), CoreError::from(e))),
                    Err(failed) => Err(failed),
                };
                match outcome {
                    Ok(user_id) => rolled_back_users.push(user_id),
                    Err((current, err)) => {
                        let item = self.record_failure(snapshot, current.as_ref(), &err, &scope).await;
                        failures.push((item, err));
                    }
                }
            }
        }

        let status = match (rolled_back_users.is_empty(), failures.is_empty()) {
            (_, true) => OperationStatus::Completed,
            (false, false) => OperationStatus::PartialSuccess,
            (true, false) => OperationStatus::Failed,
        };
        let error_message = failures.first().map(|(item, _)| item.error.clone());
        self.executor
            .close_operation(&mut operation, status, error_message)
            .await;

        self.executor.events.publish(
            MigrationEvent::new(event_types::ROLLED_BACK)
                .with_operation(rollback_id)
                .with_actor(actor.user_id)
                .with_payload(serde_json::json!({
                    "reverses": original.id,
                    "status": status,
                    "rolled_back": rolled_back_users.len(),
                    "failed": failures.len(),
                })),
        );
        if failures.is_empty() {
            tracing::info!(%rollback_id, reverses = %original.id, users = rolled_back_users.len(), "Rollback completed");
        } else {
            tracing::warn!(
                %rollback_id,
                reverses = %original.id,
                rolled_back = rolled_back_users.len(),
                failed = failures.len(),
                "Rollback finished with failures",
            );
        }

        let first_error = failures.first().map(|(_, err)| err.clone());
        let report = RollbackReport {
            rollback_operation_id: rollback_id,
            reverses: original.id,
            success: failures.is_empty(),
            partial_success: !failures.is_empty() && !rolled_back_users.is_empty(),
            failed_rollbacks: failures.len(),
            rolled_back_users,
            errors: failures.into_iter().map(|(item, _)| item).collect(),
            integrity_verified: true,
        };
        Ok((report, first_error))
    }

    /// Build the compensating write for one snapshot. The snapshot's checksum
    /// is verified before anything is staged.
    async fn prepare(
        &self,
        snapshot: &Snapshot,
        scope: &ChangeScope<'_>,
    ) -> Result<(UserAggregate, PendingCommit), (Option<UserAggregate>, CoreError)> {
        let current = match self.executor.store.find_user(snapshot.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err((None, CoreError::not_found("User", snapshot.user_id))),
            Err(e) => return Err((None, e.into())),
        };
        if let Err(err) = snapshot.check_restorable(&current, Utc::now()) {
            return Err((Some(current), err));
        }
        let mut restored = match snapshot.restore_state() {
            Ok(state) => state,
            Err(err) => return Err((Some(current), err)),
        };
        // Related rows are not part of the restore; the checksum must match what the store reads back.
        restored.related = current.related.clone();
        let expected_checksum = checksum(&restored);

        let mut audit = NewAuditEntry::change(
            current.id,
            &current.email,
            current.role.as_str(),
            restored.role.as_str(),
            scope.actor.user_id,
        )
        .with_operation(scope.operation_id, scope.bulk_operation_id)
        .with_reason(scope.reason)
        .with_ip(scope.actor.ip_address.as_deref());
        if let Some(original) = scope.rollback_of {
            audit = audit.with_rollback_of(original);
        }

        let commit = PendingCommit {
            user_id: current.id,
            expected_version: current.version,
            next_state: restored,
            expected_checksum,
            snapshot: None,
            audit,
        };
        Ok((current, commit))
    }

    async fn record_failure(
        &self,
        snapshot: &Snapshot,
        current: Option<&UserAggregate>,
        err: &CoreError,
        scope: &ChangeScope<'_>,
    ) -> ItemError {
        let target = match current {
            Some(user) => RejectedTarget::user(user),
            None => RejectedTarget {
                user_id: Some(snapshot.user_id),
                email: None,
                role: None,
            },
        };
        let requested = snapshot.state.get("role").and_then(|r| r.as_str());
        self.executor.reject(scope, target, requested, err.code()).await;

        ItemError {
            user_id: Some(snapshot.user_id),
            email: current.map(|u| u.email.clone()),
            error: err.to_string(),
            code: err.code(),
        }
    }
}
