//! Role changes for one user at a time.
//!
//! Every change follows the same path: resolve the user, evaluate the
//! transition, snapshot the raw state, repair corruption, checksum, and hand
//! a [`PendingCommit`] to the store, which applies it with a compare-and-swap
//! on the user's version. Every call leaves exactly one audit entry behind,
//! whether the change landed or was refused.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use roleshift_core::audit::{AuditEntry, NewAuditEntry, REJECTION_ALREADY_ASSIGNED, REJECTION_ALREADY_COMPATIBLE};
use roleshift_core::checksum::{checksum, verify_unchanged, ChecksumReport};
use roleshift_core::error::CoreError;
use roleshift_core::integrity::{CorruptionMode, DataFix, IntegrityRepairPolicy};
use roleshift_core::migration::{MigrationOperation, OperationScope, OperationStatus};
use roleshift_core::roles::Role;
use roleshift_core::snapshot::NewSnapshot;
use roleshift_core::transition::{Approval, TransitionRequest, TransitionValidator};
use roleshift_core::types::{DbId, OperationId};
use roleshift_core::user::UserAggregate;
use roleshift_db::{CommitReceipt, MigrationStore, PendingCommit};
use roleshift_events::{event_types, EventBus, MigrationEvent, Notifier, RoleChangeNotice};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::governor::ResourceGovernor;
use crate::progress::ProgressTracker;
use crate::rate_limit::OperatorRateLimiter;

/// Reason recorded for v2 migrations when the caller gives none.
pub const V2_MIGRATION_REASON: &str = "Role system v2 migration";
pub const SKIP_ALREADY_ASSIGNED: &str = "User already has the requested role";
pub const SKIP_ALREADY_COMPATIBLE: &str = "User already has compatible role";

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// The operator performing a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: DbId,
    pub ip_address: Option<String>,
}

impl Actor {
    pub fn new(user_id: DbId) -> Self {
        Self {
            user_id,
            ip_address: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

/// A user addressed by id or by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(DbId),
    Email(String),
}

impl UserRef {
    pub fn id(&self) -> Option<DbId> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Email(_) => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Email(email) => Some(email),
        }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Email(email) => f.write_str(email),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignRoleRequest {
    pub target: UserRef,
    /// Raw role name as supplied by the caller; validated by the engine.
    pub new_role: Option<String>,
    pub reason: Option<String>,
    pub notify_user: bool,
    /// Set once the operator has confirmed a change to their own privileged role.
    pub confirm_self_modification: bool,
    pub corruption_mode: CorruptionMode,
}

impl AssignRoleRequest {
    pub fn new(target: UserRef, new_role: impl Into<String>) -> Self {
        Self {
            target,
            new_role: Some(new_role.into()),
            reason: None,
            notify_user: false,
            confirm_self_modification: false,
            corruption_mode: CorruptionMode::default(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Move one user to the v2 role for their current role.
#[derive(Debug, Clone)]
pub struct UserMigrationRequest {
    pub target: UserRef,
    pub reason: Option<String>,
    pub notify_user: bool,
    pub corruption_mode: CorruptionMode,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityCheck {
    pub passed: bool,
    pub pre_checksum: String,
    pub post_checksum: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub operation_id: OperationId,
    pub user_id: DbId,
    pub email: String,
    pub old_role: Role,
    pub new_role: Role,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub version: i64,
    pub audit_entry_id: Option<DbId>,
    pub snapshot_id: Option<DbId>,
    pub data_fixes: Vec<DataFix>,
    pub data_integrity_check: Option<IntegrityCheck>,
    pub self_modification: bool,
    pub notified: bool,
    pub migration_time_ms: u64,
}

impl MigrationResult {
    fn skipped(
        operation_id: OperationId,
        user: &UserAggregate,
        reason: &str,
        audit: Option<AuditEntry>,
        started: Instant,
    ) -> Self {
        Self {
            operation_id,
            user_id: user.id,
            email: user.email.clone(),
            old_role: user.role,
            new_role: user.role,
            skipped: true,
            skip_reason: Some(reason.to_string()),
            version: user.version,
            audit_entry_id: audit.map(|e| e.id),
            snapshot_id: None,
            data_fixes: Vec::new(),
            data_integrity_check: None,
            self_modification: false,
            notified: false,
            migration_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared planning
// ---------------------------------------------------------------------------

/// Who, why, and under which operation a change is being made.
pub(crate) struct ChangeScope<'a> {
    pub operation_id: OperationId,
    pub bulk_operation_id: Option<OperationId>,
    pub rollback_of: Option<OperationId>,
    pub actor: &'a Actor,
    pub reason: Option<&'a str>,
    pub corruption_mode: CorruptionMode,
    pub confirm_self_modification: bool,
}

/// The audit subject of a refused change.
pub(crate) struct RejectedTarget<'a> {
    pub user_id: Option<DbId>,
    pub email: Option<&'a str>,
    pub role: Option<Role>,
}

impl<'a> RejectedTarget<'a> {
    pub fn user(user: &'a UserAggregate) -> Self {
        Self {
            user_id: Some(user.id),
            email: Some(&user.email),
            role: Some(user.role),
        }
    }

    pub fn reference(target: &'a UserRef) -> Self {
        Self {
            user_id: target.id(),
            email: target.email(),
            role: None,
        }
    }
}

/// What a successful evaluation produced besides the commit itself.
#[derive(Debug, Clone)]
pub(crate) struct ChangeSummary {
    pub approval: Approval,
    pub data_fixes: Vec<DataFix>,
    pub pre_checksum: String,
    pub post_checksum: String,
}

impl ChangeSummary {
    pub fn demotes_privileged(&self) -> bool {
        self.approval.old_role.is_privileged() && !self.approval.new_role.is_privileged()
    }

    pub fn integrity_check(&self) -> IntegrityCheck {
        IntegrityCheck {
            passed: self.pre_checksum == self.post_checksum,
            pre_checksum: self.pre_checksum.clone(),
            post_checksum: self.post_checksum.clone(),
        }
    }
}

pub(crate) struct PlannedChange {
    pub commit: PendingCommit,
    pub summary: ChangeSummary,
}

pub(crate) enum Plan {
    /// The user already holds the requested role.
    Unchanged(Approval),
    Change(Box<PlannedChange>),
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MigrationExecutor {
    pub(crate) store: Arc<dyn MigrationStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) tracker: ProgressTracker,
    pub(crate) governor: ResourceGovernor,
    pub(crate) limiter: OperatorRateLimiter,
    pub(crate) config: Arc<EngineConfig>,
}

impl MigrationExecutor {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        notifier: Arc<dyn Notifier>,
        events: Arc<EventBus>,
        tracker: ProgressTracker,
        governor: ResourceGovernor,
        limiter: OperatorRateLimiter,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            notifier,
            events,
            tracker,
            governor,
            limiter,
            config,
        }
    }

    /// Change one user's role.
    pub async fn assign_role(&self, req: AssignRoleRequest, actor: &Actor) -> Result<MigrationResult, CoreError> {
        let scope = ChangeScope {
            operation_id: Uuid::now_v7(),
            bulk_operation_id: None,
            rollback_of: None,
            actor,
            reason: req.reason.as_deref(),
            corruption_mode: req.corruption_mode,
            confirm_self_modification: req.confirm_self_modification,
        };

        let user = match self.resolve(&req.target).await {
            Ok(user) => user,
            Err(err) => {
                self.reject(&scope, RejectedTarget::reference(&req.target), req.new_role.as_deref(), err.code())
                    .await;
                return Err(err);
            }
        };

        if let Err(err) = self.limiter.check(actor.user_id).await {
            self.reject(&scope, RejectedTarget::user(&user), req.new_role.as_deref(), err.code())
                .await;
            return Err(err);
        }

        self.change_single(user, req.new_role.as_deref(), req.notify_user, &scope)
            .await
    }

    /// Move one user to their v2 role. Users already on a v2 role are skipped.
    pub async fn migrate_user(&self, req: UserMigrationRequest, actor: &Actor) -> Result<MigrationResult, CoreError> {
        let started = Instant::now();
        let reason = req.reason.as_deref().unwrap_or(V2_MIGRATION_REASON);
        let scope = ChangeScope {
            operation_id: Uuid::now_v7(),
            bulk_operation_id: None,
            rollback_of: None,
            actor,
            reason: Some(reason),
            corruption_mode: req.corruption_mode,
            confirm_self_modification: false,
        };

        let user = match self.resolve(&req.target).await {
            Ok(user) => user,
            Err(err) => {
                self.reject(&scope, RejectedTarget::reference(&req.target), None, err.code())
                    .await;
                return Err(err);
            }
        };

        let Some(target) = user.role.v2_target() else {
            let audit = self
                .reject(
                    &scope,
                    RejectedTarget::user(&user),
                    Some(user.role.as_str()),
                    REJECTION_ALREADY_COMPATIBLE,
                )
                .await;
            tracing::info!(user_id = user.id, role = %user.role, "User already has a v2 role, skipping");
            return Ok(MigrationResult::skipped(
                scope.operation_id,
                &user,
                SKIP_ALREADY_COMPATIBLE,
                audit,
                started,
            ));
        };

        self.change_single(user, Some(target.as_str()), req.notify_user, &scope)
            .await
    }

    /// Checksum and covered fields for one user.
    pub async fn checksum_report(&self, user_id: DbId) -> Result<ChecksumReport, CoreError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("User", user_id))?;
        Ok(ChecksumReport::for_user(&user))
    }

    async fn change_single(
        &self,
        user: UserAggregate,
        new_role: Option<&str>,
        notify_user: bool,
        scope: &ChangeScope<'_>,
    ) -> Result<MigrationResult, CoreError> {
        let started = Instant::now();
        let now = Utc::now();
        let mut operation = MigrationOperation::new(scope.operation_id, OperationScope::Single, scope.actor.user_id, now);
        operation.from_role = Some(user.role);
        operation.to_role = Role::parse_input(new_role).ok();
        operation.target_user_ids = vec![user.id];
        operation.reason = scope.reason.map(str::to_string);
        operation.transition(OperationStatus::Running, now)?;

        let applied = self.apply_single(&user, new_role, scope).await;
        match applied {
            Ok(None) => {
                let audit = self
                    .reject(scope, RejectedTarget::user(&user), new_role, REJECTION_ALREADY_ASSIGNED)
                    .await;
                self.close_operation(&mut operation, OperationStatus::Completed, None)
                    .await;
                tracing::info!(user_id = user.id, role = %user.role, "User already holds requested role");
                Ok(MigrationResult::skipped(
                    scope.operation_id,
                    &user,
                    SKIP_ALREADY_ASSIGNED,
                    audit,
                    started,
                ))
            }
            Ok(Some((summary, receipt))) => {
                self.close_operation(&mut operation, OperationStatus::Completed, None)
                    .await;
                self.events.publish(
                    MigrationEvent::new(event_types::ROLE_CHANGED)
                        .with_operation(scope.operation_id)
                        .with_user(user.id)
                        .with_actor(scope.actor.user_id)
                        .with_payload(serde_json::json!({
                            "old_role": summary.approval.old_role,
                            "new_role": summary.approval.new_role,
                        })),
                );
                let notified = if notify_user {
                    self.notify(&receipt.user, summary.approval.old_role, scope.reason)
                        .await
                } else {
                    false
                };

                tracing::info!(
                    operation_id = %scope.operation_id,
                    user_id = user.id,
                    old_role = %summary.approval.old_role,
                    new_role = %summary.approval.new_role,
                    fixes = summary.data_fixes.len(),
                    "Role changed",
                );

                Ok(MigrationResult {
                    operation_id: scope.operation_id,
                    user_id: user.id,
                    email: receipt.user.email.clone(),
                    old_role: summary.approval.old_role,
                    new_role: summary.approval.new_role,
                    skipped: false,
                    skip_reason: None,
                    version: receipt.user.version,
                    audit_entry_id: Some(receipt.audit_entry.id),
                    snapshot_id: receipt.snapshot_id,
                    data_integrity_check: Some(summary.integrity_check()),
                    self_modification: summary.approval.self_modification,
                    data_fixes: summary.data_fixes,
                    notified,
                    migration_time_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(err) => {
                self.reject(scope, RejectedTarget::user(&user), new_role, err.code())
                    .await;
                self.close_operation(&mut operation, OperationStatus::Failed, Some(err.to_string()))
                    .await;
                self.events.publish(
                    MigrationEvent::new(event_types::ROLE_CHANGE_REJECTED)
                        .with_operation(scope.operation_id)
                        .with_user(user.id)
                        .with_actor(scope.actor.user_id)
                        .with_payload(serde_json::json!({ "code": err.code() })),
                );
                tracing::warn!(
                    operation_id = %scope.operation_id,
                    user_id = user.id,
                    code = err.code(),
                    error = %err,
                    "Role change rejected",
                );
                Err(err)
            }
        }
    }

    /// Evaluate and commit. `None` means the user already held the role.
    async fn apply_single(
        &self,
        user: &UserAggregate,
        new_role: Option<&str>,
        scope: &ChangeScope<'_>,
    ) -> Result<Option<(ChangeSummary, CommitReceipt)>, CoreError> {
        let privileged = self.store.count_by_role(Role::Admin).await?;
        let planned = match self.plan(user, new_role, privileged, scope)? {
            Plan::Unchanged(_) => return Ok(None),
            Plan::Change(planned) => *planned,
        };

        let PlannedChange { commit, summary } = planned;
        let receipt = self
            .store
            .commit(vec![commit])
            .await?
            .pop()
            .ok_or_else(|| CoreError::Internal("Commit returned no receipt".into()))?;
        Ok(Some((summary, receipt)))
    }

    /// Build the commit for moving `user` to `new_role`. Pure apart from the
    /// clock: nothing is written.
    pub(crate) fn plan(
        &self,
        user: &UserAggregate,
        new_role: Option<&str>,
        privileged_count: i64,
        scope: &ChangeScope<'_>,
    ) -> Result<Plan, CoreError> {
        let approval = TransitionValidator::evaluate(&TransitionRequest {
            target: user,
            new_role,
            reason: scope.reason,
            requested_by: scope.actor.user_id,
            privileged_count,
        })?;
        if approval.no_op {
            return Ok(Plan::Unchanged(approval));
        }
        if approval.self_modification && !scope.confirm_self_modification {
            return Err(CoreError::SelfModificationWarning);
        }

        let snapshot = NewSnapshot::capture(
            scope.operation_id,
            scope.bulk_operation_id,
            user,
            self.config.retention,
            Utc::now(),
        )?;

        let mut next = user.clone();
        let data_fixes = IntegrityRepairPolicy::new(scope.corruption_mode)
            .with_default_name(self.config.default_display_name.as_str())
            .apply(&mut next)?;
        let pre_checksum = checksum(&next);
        next.role = approval.new_role;
        let post_checksum = checksum(&next);
        verify_unchanged(user.id, &pre_checksum, &post_checksum)?;

        let audit = NewAuditEntry::change(
            user.id,
            &user.email,
            approval.old_role.as_str(),
            approval.new_role.as_str(),
            scope.actor.user_id,
        )
        .with_operation(scope.operation_id, scope.bulk_operation_id)
        .with_reason(scope.reason)
        .with_ip(scope.actor.ip_address.as_deref());

        Ok(Plan::Change(Box::new(PlannedChange {
            commit: PendingCommit {
                user_id: user.id,
                expected_version: user.version,
                next_state: next,
                expected_checksum: post_checksum.clone(),
                snapshot: Some(snapshot),
                audit,
            },
            summary: ChangeSummary {
                approval,
                data_fixes,
                pre_checksum,
                post_checksum,
            },
        })))
    }

    /// Append a rejected entry. Audit failures are logged, never surfaced:
    /// the caller is already returning the original error.
    pub(crate) async fn reject(
        &self,
        scope: &ChangeScope<'_>,
        target: RejectedTarget<'_>,
        requested: Option<&str>,
        code: &str,
    ) -> Option<AuditEntry> {
        let mut entry = NewAuditEntry::rejection(
            target.user_id,
            target.email,
            target.role.map(|r| r.as_str()),
            requested,
            code,
            scope.actor.user_id,
        )
        .with_operation(scope.operation_id, scope.bulk_operation_id)
        .with_reason(scope.reason)
        .with_ip(scope.actor.ip_address.as_deref());
        if let Some(original) = scope.rollback_of {
            entry = entry.with_rollback_of(original);
        }

        match self.store.append_audit(entry).await {
            Ok(appended) => Some(appended),
            Err(e) => {
                tracing::error!(
                    operation_id = %scope.operation_id,
                    user_id = ?target.user_id,
                    error = %e,
                    "Failed to record rejected role change",
                );
                None
            }
        }
    }

    /// Tell `user` about their new role. Returns whether delivery succeeded.
    pub(crate) async fn notify(&self, user: &UserAggregate, old_role: Role, reason: Option<&str>) -> bool {
        let notice = RoleChangeNotice {
            user_email: user.email.clone(),
            old_role: old_role.as_str().to_string(),
            new_role: user.role.as_str().to_string(),
            reason: reason.map(str::to_string),
        };
        match self.notifier.notify_role_change(&notice).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(user_id = user.id, error = %e, "Role change notification failed");
                false
            }
        }
    }

    pub(crate) async fn resolve(&self, target: &UserRef) -> Result<UserAggregate, CoreError> {
        let found = match target {
            UserRef::Id(id) => self.store.find_user(*id).await?,
            UserRef::Email(email) => self.store.find_user_by_email(email).await?,
        };
        found.ok_or_else(|| CoreError::not_found("User", target))
    }

    /// Move `operation` to a terminal status and persist it. Persistence
    /// failures are logged: the user write has already been decided.
    pub(crate) async fn close_operation(
        &self,
        operation: &mut MigrationOperation,
        status: OperationStatus,
        error_message: Option<String>,
    ) {
        if let Err(e) = operation.transition(status, Utc::now()) {
            tracing::error!(operation_id = %operation.id, error = %e, "Invalid operation transition");
        }
        operation.error_message = error_message;
        self.save_operation(operation).await;
    }

    pub(crate) async fn save_operation(&self, operation: &MigrationOperation) {
        if let Err(e) = self.store.save_operation(operation).await {
            tracing::error!(operation_id = %operation.id, error = %e, "Failed to persist migration operation");
        }
    }
}
