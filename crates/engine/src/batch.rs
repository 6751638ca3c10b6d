//! Batch role migrations.
//!
//! A batch is resolved into a [`BatchPlan`] up front, so invalid roles and
//! oversized batches are refused before anything is dispatched. Targets are
//! then split into chunks that run through the [`ResourceGovernor`]; with
//! `parallel` up to `max_concurrency` chunks are in flight at once.
//!
//! Each chunk either commits user by user, or as one store transaction when
//! `atomic_transaction` is set. Without `continue_on_error` the first failure
//! stops further dispatch and the batch ends `failed`.
//!
//! [`ResourceGovernor`]: crate::governor::ResourceGovernor

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use roleshift_core::audit::{AuditEntry, REJECTION_ALREADY_ASSIGNED};
use roleshift_core::error::CoreError;
use roleshift_core::governor::{chunk_count, DryRunReport, PotentialIssue};
use roleshift_core::integrity::{CorruptionMode, DataFix};
use roleshift_core::migration::{MigrationOperation, OperationScope, OperationStatus};
use roleshift_core::progress::ItemOutcome;
use roleshift_core::roles::Role;
use roleshift_core::types::{DbId, OperationId, Timestamp};
use roleshift_core::user::UserAggregate;
use roleshift_db::CommitReceipt;
use roleshift_events::{event_types, MigrationEvent};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executor::{Actor, ChangeScope, ChangeSummary, MigrationExecutor, Plan, PlannedChange, RejectedTarget, UserRef};
use crate::progress::OperationReport;

/// Item error text for users that could not be resolved.
pub const USER_NOT_FOUND: &str = "User not found";

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum BatchSelector {
    /// Every user currently holding `from_role`.
    FromRole { from_role: String, to_role: String },
    /// An explicit list of users, moved to `new_role`.
    Explicit { users: Vec<UserRef>, new_role: String },
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub chunk_size: Option<usize>,
    pub parallel: bool,
    pub atomic_transaction: bool,
    pub continue_on_error: bool,
    pub dry_run: bool,
    pub throttle: bool,
    pub corruption_mode: CorruptionMode,
    pub notify_users: bool,
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub selector: BatchSelector,
    pub reason: Option<String>,
    pub options: BatchOptions,
}

/// A resolved batch, ready to run.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub from_role: Option<Role>,
    pub to_role: Role,
    pub targets: Vec<UserAggregate>,
    pub missing: Vec<UserRef>,
    /// Users that already hold `to_role`. Reported as skipped, not counted in the total.
    pub already_assigned: Vec<UserAggregate>,
    pub reason: Option<String>,
    pub options: BatchOptions,
    pub chunk_size: usize,
}

impl BatchPlan {
    /// Items the progress record counts.
    pub fn total(&self) -> usize {
        self.targets.len() + self.missing.len()
    }
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Migrated,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub user_id: Option<DbId>,
    pub email: Option<String>,
    pub status: ItemStatus,
    pub old_role: Option<Role>,
    pub new_role: Option<Role>,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
    pub data_fixes: Vec<DataFix>,
    pub audit_entry_id: Option<DbId>,
    pub notified: bool,
}

impl ItemResult {
    fn migrated(user: &UserAggregate, summary: ChangeSummary, receipt: &CommitReceipt, notified: bool) -> Self {
        Self {
            user_id: Some(user.id),
            email: Some(user.email.clone()),
            status: ItemStatus::Migrated,
            old_role: Some(summary.approval.old_role),
            new_role: Some(summary.approval.new_role),
            error: None,
            error_code: None,
            data_fixes: summary.data_fixes,
            audit_entry_id: Some(receipt.audit_entry.id),
            notified,
        }
    }

    fn skipped(user: &UserAggregate, audit: Option<AuditEntry>) -> Self {
        Self {
            user_id: Some(user.id),
            email: Some(user.email.clone()),
            status: ItemStatus::Skipped,
            old_role: Some(user.role),
            new_role: Some(user.role),
            error: None,
            error_code: None,
            data_fixes: Vec::new(),
            audit_entry_id: audit.map(|e| e.id),
            notified: false,
        }
    }

    fn failed(user: &UserAggregate, to_role: Role, err: &CoreError, audit: Option<AuditEntry>) -> Self {
        Self {
            user_id: Some(user.id),
            email: Some(user.email.clone()),
            status: ItemStatus::Failed,
            old_role: Some(user.role),
            new_role: Some(to_role),
            error: Some(err.to_string()),
            error_code: Some(err.code()),
            data_fixes: Vec::new(),
            audit_entry_id: audit.map(|e| e.id),
            notified: false,
        }
    }

    fn missing(target: &UserRef, to_role: Role, audit: Option<AuditEntry>) -> Self {
        Self {
            user_id: target.id(),
            email: target.email().map(str::to_string),
            status: ItemStatus::Failed,
            old_role: None,
            new_role: Some(to_role),
            error: Some(USER_NOT_FOUND.to_string()),
            error_code: Some("NOT_FOUND"),
            data_fixes: Vec::new(),
            audit_entry_id: audit.map(|e| e.id),
            notified: false,
        }
    }

    fn outcome(&self) -> ItemOutcome {
        match self.status {
            ItemStatus::Failed => ItemOutcome::Failed,
            ItemStatus::Migrated | ItemStatus::Skipped => ItemOutcome::Succeeded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub user_id: Option<DbId>,
    pub email: Option<String>,
    pub error: String,
    pub code: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub bulk_operation_id: OperationId,
    pub status: OperationStatus,
    pub from_role: Option<Role>,
    pub to_role: Role,
    pub total_users: usize,
    pub migrated: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Users in chunks that were never dispatched (cancellation or abort).
    pub not_attempted: usize,
    pub chunks: usize,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub duration_ms: u64,
    pub average_ms_per_user: f64,
    pub within_time_ceiling: bool,
    pub results: Vec<ItemResult>,
    pub errors: Vec<ItemError>,
}

impl BatchReport {
    /// The batch-level error, when any item failed.
    pub fn failure(&self) -> Option<CoreError> {
        (self.failed > 0).then(|| CoreError::PartialBatchFailure {
            total: self.total_users,
            failed: self.failed,
        })
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Owned state shared by every chunk of one batch.
struct ChunkContext {
    operation_id: OperationId,
    actor: Actor,
    reason: Option<String>,
    to_role: Role,
    options: BatchOptions,
    abort: AtomicBool,
    cancel: CancellationToken,
}

impl ChunkContext {
    fn scope(&self) -> ChangeScope<'_> {
        ChangeScope {
            operation_id: self.operation_id,
            bulk_operation_id: Some(self.operation_id),
            rollback_of: None,
            actor: &self.actor,
            reason: self.reason.as_deref(),
            corruption_mode: self.options.corruption_mode,
            confirm_self_modification: false,
        }
    }

    fn halt_on_failure(&self) {
        if !self.options.continue_on_error {
            self.abort.store(true, Ordering::SeqCst);
        }
    }
}

impl MigrationExecutor {
    /// Resolve a batch request against current data.
    pub async fn plan_batch(&self, req: BatchRequest) -> Result<BatchPlan, CoreError> {
        let limits = self.governor.limits();
        let chunk_size = limits.effective_chunk_size(req.options.chunk_size);

        let mut targets = Vec::new();
        let mut missing = Vec::new();
        let mut already_assigned = Vec::new();

        let (from_role, to_role) = match &req.selector {
            BatchSelector::FromRole { from_role, to_role } => {
                let from = Role::parse_input(Some(from_role))?;
                let to = Role::parse_input(Some(to_role))?;
                if from == to {
                    return Err(CoreError::Validation("from_role and to_role must differ".into()));
                }
                targets = self.store.list_users_by_role(from).await?;
                (Some(from), to)
            }
            BatchSelector::Explicit { users, new_role } => {
                let to = Role::parse_input(Some(new_role))?;
                if users.is_empty() {
                    return Err(CoreError::Validation("At least one user is required".into()));
                }
                let mut seen = HashSet::new();
                for reference in users {
                    let found = match reference {
                        UserRef::Id(id) => self.store.find_user(*id).await?,
                        UserRef::Email(email) => self.store.find_user_by_email(email).await?,
                    };
                    match found {
                        None => missing.push(reference.clone()),
                        Some(user) if !seen.insert(user.id) => {}
                        Some(user) if user.role == to => already_assigned.push(user),
                        Some(user) => targets.push(user),
                    }
                }
                (None, to)
            }
        };

        limits.check_batch_size(targets.len() + missing.len())?;

        Ok(BatchPlan {
            from_role,
            to_role,
            targets,
            missing,
            already_assigned,
            reason: req.reason,
            options: req.options,
            chunk_size,
        })
    }

    /// Evaluate every target without writing anything.
    pub async fn dry_run(&self, plan: &BatchPlan, actor: &Actor) -> Result<DryRunReport, CoreError> {
        let scope = ChangeScope {
            operation_id: Uuid::now_v7(),
            bulk_operation_id: None,
            rollback_of: None,
            actor,
            reason: plan.reason.as_deref(),
            corruption_mode: plan.options.corruption_mode,
            confirm_self_modification: false,
        };
        let mut privileged = self.store.count_by_role(Role::Admin).await?;

        let mut would_migrate = 0;
        let mut would_skip = plan.already_assigned.len();
        let mut potential_issues: Vec<PotentialIssue> = plan
            .missing
            .iter()
            .map(|r| PotentialIssue {
                user_id: r.id(),
                email: r.email().map(str::to_string),
                issue: USER_NOT_FOUND.to_string(),
            })
            .collect();

        for user in &plan.targets {
            match self.plan(user, Some(plan.to_role.as_str()), privileged, &scope) {
                Ok(Plan::Unchanged(_)) => would_skip += 1,
                Ok(Plan::Change(change)) => {
                    would_migrate += 1;
                    if change.summary.demotes_privileged() {
                        privileged -= 1;
                    }
                }
                Err(err) => potential_issues.push(PotentialIssue {
                    user_id: Some(user.id),
                    email: Some(user.email.clone()),
                    issue: err.to_string(),
                }),
            }
        }

        let total = plan.total();
        let report = DryRunReport {
            dry_run: true,
            total_users: total,
            would_migrate,
            would_skip,
            would_fail: potential_issues.len(),
            chunks: chunk_count(total, plan.chunk_size),
            estimated_duration_ms: self.governor.limits().estimate_duration_ms(
                total,
                plan.chunk_size,
                plan.options.parallel,
                plan.options.throttle,
            ),
            potential_issues,
        };
        tracing::info!(
            total,
            would_migrate = report.would_migrate,
            would_fail = report.would_fail,
            "Batch dry run evaluated",
        );
        Ok(report)
    }

    /// Run a batch to completion and return its report.
    pub async fn run_batch(&self, req: BatchRequest, actor: Actor) -> Result<OperationReport, CoreError> {
        let plan = self.plan_batch(req).await?;
        if plan.options.dry_run {
            return Ok(OperationReport::DryRun(self.dry_run(&plan, &actor).await?));
        }
        let operation_id = Uuid::now_v7();
        let cancel = self
            .tracker
            .register(operation_id, plan.total(), plan.options.continue_on_error)
            .await;
        let report = self.execute_plan(plan, actor, operation_id, cancel).await?;
        Ok(OperationReport::Batch(report))
    }

    /// Plan a batch and run it in the background. Returns the id to poll.
    pub async fn start_batch(&self, req: BatchRequest, actor: Actor) -> Result<OperationId, CoreError> {
        let plan = self.plan_batch(req).await?;
        let operation_id = Uuid::now_v7();

        if plan.options.dry_run {
            let report = self.dry_run(&plan, &actor).await?;
            self.tracker.register(operation_id, 0, false).await;
            self.tracker
                .complete(operation_id, OperationStatus::Completed, OperationReport::DryRun(report))
                .await;
            return Ok(operation_id);
        }

        let cancel = self
            .tracker
            .register(operation_id, plan.total(), plan.options.continue_on_error)
            .await;
        let executor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.execute_plan(plan, actor, operation_id, cancel).await {
                tracing::error!(%operation_id, error = %e, "Background batch migration failed");
                executor
                    .tracker
                    .finish(operation_id, OperationStatus::Failed)
                    .await;
            }
        });
        Ok(operation_id)
    }

    async fn execute_plan(
        &self,
        plan: BatchPlan,
        actor: Actor,
        operation_id: OperationId,
        cancel: CancellationToken,
    ) -> Result<BatchReport, CoreError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let BatchPlan {
            from_role,
            to_role,
            targets,
            missing,
            already_assigned,
            reason,
            options,
            chunk_size,
        } = plan;
        let total = targets.len() + missing.len();

        let mut operation = MigrationOperation::new(operation_id, OperationScope::Batch, actor.user_id, started_at);
        operation.from_role = from_role;
        operation.to_role = Some(to_role);
        operation.target_user_ids = targets.iter().map(|u| u.id).collect();
        operation.reason = reason.clone();
        operation.transition(OperationStatus::Running, started_at)?;
        self.save_operation(&operation).await;

        tracing::info!(
            %operation_id,
            total,
            chunk_size,
            parallel = options.parallel,
            atomic = options.atomic_transaction,
            "Batch migration started",
        );
        self.events.publish(
            MigrationEvent::new(event_types::BATCH_STARTED)
                .with_operation(operation_id)
                .with_actor(actor.user_id)
                .with_payload(serde_json::json!({ "total": total, "to_role": to_role })),
        );

        let ctx = Arc::new(ChunkContext {
            operation_id,
            actor,
            reason,
            to_role,
            abort: AtomicBool::new(!missing.is_empty() && !options.continue_on_error),
            options,
            cancel,
        });

        let mut results = Vec::with_capacity(total + already_assigned.len());
        {
            let scope = ctx.scope();
            for user in &already_assigned {
                let audit = self
                    .reject(&scope, RejectedTarget::user(user), Some(to_role.as_str()), REJECTION_ALREADY_ASSIGNED)
                    .await;
                results.push(ItemResult::skipped(user, audit));
            }
            for reference in &missing {
                let audit = self
                    .reject(&scope, RejectedTarget::reference(reference), Some(to_role.as_str()), "NOT_FOUND")
                    .await;
                self.tracker.record(operation_id, ItemOutcome::Failed).await;
                results.push(ItemResult::missing(reference, to_role, audit));
            }
        }

        let chunks: Vec<Vec<UserAggregate>> = targets.chunks(chunk_size).map(<[_]>::to_vec).collect();
        let chunk_total = chunks.len();
        let concurrency = if ctx.options.parallel {
            self.governor.limits().max_concurrency.max(1)
        } else {
            1
        };

        let mut chunk_results: Vec<(usize, Vec<ItemResult>)> = stream::iter(chunks.into_iter().enumerate())
            .map(|(index, chunk)| {
                let executor = self.clone();
                let ctx = Arc::clone(&ctx);
                async move { (index, executor.run_chunk(index, chunk, &ctx).await) }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        chunk_results.sort_by_key(|(index, _)| *index);
        results.extend(chunk_results.into_iter().flat_map(|(_, items)| items));

        let cancelled = ctx.cancel.is_cancelled();
        let status = self.tracker.settled_status(operation_id).await.unwrap_or(if cancelled {
            OperationStatus::Cancelled
        } else {
            OperationStatus::Failed
        });
        self.close_operation(&mut operation, status, None).await;

        let elapsed = clock.elapsed();
        let count = |s: ItemStatus| results.iter().filter(|r| r.status == s).count();
        let migrated = count(ItemStatus::Migrated);
        let skipped = count(ItemStatus::Skipped);
        let failed = count(ItemStatus::Failed);
        // Already-assigned users are reported but sit outside the progress total.
        let processed = results.len() - already_assigned.len();
        self.governor.record_users(processed, elapsed);

        let average_ms_per_user = if processed == 0 {
            0.0
        } else {
            elapsed.as_secs_f64() * 1000.0 / processed as f64
        };
        let errors = results
            .iter()
            .filter(|r| r.status == ItemStatus::Failed)
            .map(|r| ItemError {
                user_id: r.user_id,
                email: r.email.clone(),
                error: r.error.clone().unwrap_or_default(),
                code: r.error_code.unwrap_or("INTERNAL_ERROR"),
            })
            .collect();

        let report = BatchReport {
            bulk_operation_id: operation_id,
            status,
            from_role,
            to_role,
            total_users: total,
            migrated,
            successful: processed - failed,
            failed,
            skipped,
            not_attempted: total.saturating_sub(processed),
            chunks: chunk_total,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
            average_ms_per_user,
            within_time_ceiling: average_ms_per_user <= self.governor.limits().per_user_ceiling_ms as f64,
            results,
            errors,
        };

        match report.failure() {
            Some(err) => tracing::warn!(%operation_id, status = status.as_str(), error = %err, "Batch migration finished with failures"),
            None => tracing::info!(%operation_id, status = status.as_str(), migrated, "Batch migration finished"),
        }
        let event = if status == OperationStatus::Cancelled {
            event_types::BATCH_CANCELLED
        } else {
            event_types::BATCH_FINISHED
        };
        self.events.publish(
            MigrationEvent::new(event)
                .with_operation(operation_id)
                .with_actor(ctx.actor.user_id)
                .with_payload(serde_json::json!({
                    "status": status,
                    "migrated": migrated,
                    "failed": failed,
                })),
        );

        self.tracker
            .complete(operation_id, status, OperationReport::Batch(report.clone()))
            .await;
        Ok(report)
    }

    async fn run_chunk(&self, index: usize, chunk: Vec<UserAggregate>, ctx: &ChunkContext) -> Vec<ItemResult> {
        let admitted = tokio::select! {
            admitted = self.governor.admit(ctx.options.throttle) => admitted,
            () = ctx.cancel.cancelled() => {
                tracing::debug!(operation_id = %ctx.operation_id, chunk = index, "Skipping undispatched chunk");
                return Vec::new();
            }
        };
        let _permit = match admitted {
            Ok(permit) => permit,
            Err(err) => return self.fail_chunk(chunk, &err, ctx).await,
        };

        if ctx.cancel.is_cancelled() || ctx.abort.load(Ordering::SeqCst) {
            tracing::debug!(operation_id = %ctx.operation_id, chunk = index, "Skipping undispatched chunk");
            return Vec::new();
        }

        tracing::debug!(operation_id = %ctx.operation_id, chunk = index, users = chunk.len(), "Dispatching chunk");
        if ctx.options.atomic_transaction {
            self.run_chunk_atomic(chunk, ctx).await
        } else {
            self.run_chunk_itemwise(chunk, ctx).await
        }
    }

    async fn run_chunk_itemwise(&self, chunk: Vec<UserAggregate>, ctx: &ChunkContext) -> Vec<ItemResult> {
        let mut privileged = match self.store.count_by_role(Role::Admin).await {
            Ok(count) => count,
            Err(e) => return self.fail_chunk(chunk, &e.into(), ctx).await,
        };

        let mut results = Vec::with_capacity(chunk.len());
        for stale in chunk {
            if ctx.abort.load(Ordering::SeqCst) {
                break;
            }
            let result = self.migrate_item(stale, &mut privileged, ctx).await;
            self.tracker.record(ctx.operation_id, result.outcome()).await;
            if result.status == ItemStatus::Failed {
                ctx.halt_on_failure();
            }
            results.push(result);
        }
        results
    }

    async fn migrate_item(&self, stale: UserAggregate, privileged: &mut i64, ctx: &ChunkContext) -> ItemResult {
        let scope = ctx.scope();
        let to = ctx.to_role.as_str();

        let user = match self.reload(&stale).await {
            Ok(user) => user,
            Err(err) => {
                let audit = self
                    .reject(&scope, RejectedTarget::user(&stale), Some(to), err.code())
                    .await;
                return ItemResult::failed(&stale, ctx.to_role, &err, audit);
            }
        };

        let planned = match self.plan(&user, Some(to), *privileged, &scope) {
            Ok(Plan::Change(planned)) => *planned,
            Ok(Plan::Unchanged(_)) => {
                let audit = self
                    .reject(&scope, RejectedTarget::user(&user), Some(to), REJECTION_ALREADY_ASSIGNED)
                    .await;
                return ItemResult::skipped(&user, audit);
            }
            Err(err) => {
                let audit = self
                    .reject(&scope, RejectedTarget::user(&user), Some(to), err.code())
                    .await;
                return ItemResult::failed(&user, ctx.to_role, &err, audit);
            }
        };

        let PlannedChange { commit, summary } = planned;
        let committed = self
            .store
            .commit(vec![commit])
            .await
            .map_err(CoreError::from)
            .and_then(|mut receipts| {
                receipts
                    .pop()
                    .ok_or_else(|| CoreError::Internal("Commit returned no receipt".into()))
            });
        match committed {
            Ok(receipt) => {
                if summary.demotes_privileged() {
                    *privileged -= 1;
                }
                self.committed(&user, summary, receipt, ctx).await
            }
            Err(err) => {
                let audit = self
                    .reject(&scope, RejectedTarget::user(&user), Some(to), err.code())
                    .await;
                ItemResult::failed(&user, ctx.to_role, &err, audit)
            }
        }
    }

    /// Plan every user first, then commit the chunk in one transaction.
    async fn run_chunk_atomic(&self, chunk: Vec<UserAggregate>, ctx: &ChunkContext) -> Vec<ItemResult> {
        let scope = ctx.scope();
        let to = ctx.to_role.as_str();
        let mut privileged = match self.store.count_by_role(Role::Admin).await {
            Ok(count) => count,
            Err(e) => return self.fail_chunk(chunk, &e.into(), ctx).await,
        };

        let mut staged: Vec<(UserAggregate, Result<Option<PlannedChange>, CoreError>)> = Vec::with_capacity(chunk.len());
        for stale in chunk {
            let user = match self.reload(&stale).await {
                Ok(user) => user,
                Err(err) => {
                    staged.push((stale, Err(err)));
                    continue;
                }
            };
            let planned = self
                .plan(&user, Some(to), privileged, &scope)
                .map(|plan| match plan {
                    Plan::Unchanged(_) => None,
                    Plan::Change(change) => {
                        if change.summary.demotes_privileged() {
                            privileged -= 1;
                        }
                        Some(*change)
                    }
                });
            staged.push((user, planned));
        }

        let first_failure = staged
            .iter()
            .find_map(|(user, planned)| planned.as_ref().err().map(|e| (user.id, e.to_string())));
        if let Some((failed_id, message)) = first_failure {
            let mut results = Vec::with_capacity(staged.len());
            for (user, planned) in staged {
                let err = planned.err().unwrap_or_else(|| {
                    CoreError::Conflict(format!("Chunk rolled back: user {failed_id} failed: {message}"))
                });
                let audit = self
                    .reject(&scope, RejectedTarget::user(&user), Some(to), err.code())
                    .await;
                let result = ItemResult::failed(&user, ctx.to_role, &err, audit);
                self.tracker.record(ctx.operation_id, result.outcome()).await;
                results.push(result);
            }
            ctx.halt_on_failure();
            return results;
        }

        let mut results = Vec::with_capacity(staged.len());
        let mut commits = Vec::new();
        let mut changed = Vec::new();
        for (user, planned) in staged {
            match planned.ok().flatten() {
                Some(PlannedChange { commit, summary }) => {
                    commits.push(commit);
                    changed.push((user, summary));
                }
                None => {
                    let audit = self
                        .reject(&scope, RejectedTarget::user(&user), Some(to), REJECTION_ALREADY_ASSIGNED)
                        .await;
                    let result = ItemResult::skipped(&user, audit);
                    self.tracker.record(ctx.operation_id, result.outcome()).await;
                    results.push(result);
                }
            }
        }
        if commits.is_empty() {
            return results;
        }

        match self.store.commit(commits).await {
            Ok(receipts) => {
                for ((user, summary), receipt) in changed.into_iter().zip(receipts) {
                    let result = self.committed(&user, summary, receipt, ctx).await;
                    self.tracker.record(ctx.operation_id, result.outcome()).await;
                    results.push(result);
                }
            }
            Err(e) => {
                let err = CoreError::from(e);
                tracing::warn!(operation_id = %ctx.operation_id, error = %err, "Atomic chunk rolled back");
                for (user, _) in changed {
                    let audit = self
                        .reject(&scope, RejectedTarget::user(&user), Some(to), err.code())
                        .await;
                    let result = ItemResult::failed(&user, ctx.to_role, &err, audit);
                    self.tracker.record(ctx.operation_id, result.outcome()).await;
                    results.push(result);
                }
                ctx.halt_on_failure();
            }
        }
        results
    }

    async fn committed(
        &self,
        user: &UserAggregate,
        summary: ChangeSummary,
        receipt: CommitReceipt,
        ctx: &ChunkContext,
    ) -> ItemResult {
        let notified = if ctx.options.notify_users {
            self.notify(&receipt.user, summary.approval.old_role, ctx.reason.as_deref())
                .await
        } else {
            false
        };
        ItemResult::migrated(user, summary, &receipt, notified)
    }

    async fn fail_chunk(&self, chunk: Vec<UserAggregate>, err: &CoreError, ctx: &ChunkContext) -> Vec<ItemResult> {
        tracing::error!(operation_id = %ctx.operation_id, error = %err, "Chunk failed before any user was processed");
        let scope = ctx.scope();
        let mut results = Vec::with_capacity(chunk.len());
        for user in &chunk {
            let audit = self
                .reject(&scope, RejectedTarget::user(user), Some(ctx.to_role.as_str()), err.code())
                .await;
            let result = ItemResult::failed(user, ctx.to_role, err, audit);
            self.tracker.record(ctx.operation_id, result.outcome()).await;
            results.push(result);
        }
        ctx.halt_on_failure();
        results
    }

    /// Fresh copy of a user resolved at planning time.
    async fn reload(&self, stale: &UserAggregate) -> Result<UserAggregate, CoreError> {
        self.store
            .find_user(stale.id)
            .await?
            .ok_or_else(|| CoreError::not_found("User", stale.id))
    }
}
