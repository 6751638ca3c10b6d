//! Live progress for batch operations.
//!
//! The tracker owns one [`ProgressRecord`] per running or recently finished
//! batch, the batch's cancellation token, and its final report. Handlers
//! only read from it; the executor is the sole writer.
//!
//! An operation turns terminal in the same step that its report lands, via
//! [`ProgressTracker::complete`], and only once the executor has persisted
//! the operation row. A client that sees a terminal status can therefore
//! always fetch the report and roll the batch back.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use roleshift_core::error::CoreError;
use roleshift_core::governor::DryRunReport;
use roleshift_core::migration::OperationStatus;
use roleshift_core::progress::{ItemOutcome, ProgressRecord};
use roleshift_core::types::OperationId;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchReport;

/// The final report of a tracked operation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationReport {
    Batch(BatchReport),
    DryRun(DryRunReport),
}

struct Tracked {
    record: ProgressRecord,
    cancel: CancellationToken,
    report: Option<OperationReport>,
}

#[derive(Clone, Default)]
pub struct ProgressTracker {
    entries: Arc<RwLock<HashMap<OperationId, Tracked>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an operation. Returns the token that cancels it.
    pub async fn register(&self, operation_id: OperationId, total: usize, continue_on_error: bool) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.entries.write().await.insert(
            operation_id,
            Tracked {
                record: ProgressRecord::new(operation_id, total, continue_on_error),
                cancel: cancel.clone(),
                report: None,
            },
        );
        cancel
    }

    pub async fn record(&self, operation_id: OperationId, outcome: ItemOutcome) {
        if let Some(tracked) = self.entries.write().await.get_mut(&operation_id) {
            tracked.record.record(outcome);
        }
    }

    /// The status the operation settles in, once every item is recorded.
    pub async fn settled_status(&self, operation_id: OperationId) -> Option<OperationStatus> {
        self.entries
            .read()
            .await
            .get(&operation_id)
            .and_then(|t| t.record.settled_status())
    }

    /// End the operation without a report. Returns the settled record.
    pub async fn finish(&self, operation_id: OperationId, status: OperationStatus) -> Option<ProgressRecord> {
        let mut entries = self.entries.write().await;
        let tracked = entries.get_mut(&operation_id)?;
        tracked.record.finish(status);
        Some(tracked.record.clone())
    }

    /// Make the operation terminal with `status` and attach its report.
    pub async fn complete(
        &self,
        operation_id: OperationId,
        status: OperationStatus,
        report: OperationReport,
    ) -> Option<ProgressRecord> {
        let mut entries = self.entries.write().await;
        let tracked = entries.get_mut(&operation_id)?;
        tracked.record.finish(status);
        tracked.report = Some(report);
        Some(tracked.record.clone())
    }

    pub async fn get(&self, operation_id: OperationId) -> Option<ProgressRecord> {
        self.entries
            .read()
            .await
            .get(&operation_id)
            .map(|t| t.record.clone())
    }

    /// Ask a running batch to stop. Chunks already dispatched still complete.
    pub async fn cancel(&self, operation_id: OperationId) -> Result<ProgressRecord, CoreError> {
        let entries = self.entries.read().await;
        let tracked = entries
            .get(&operation_id)
            .ok_or_else(|| CoreError::not_found("Migration", operation_id))?;
        if tracked.record.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Migration {operation_id} already finished with status '{}'",
                tracked.record.status.as_str()
            )));
        }
        tracked.cancel.cancel();
        tracing::info!(%operation_id, "Batch cancellation requested");
        Ok(tracked.record.clone())
    }

    pub async fn report(&self, operation_id: OperationId) -> Option<OperationReport> {
        self.entries
            .read()
            .await
            .get(&operation_id)
            .and_then(|t| t.report.clone())
    }

    /// Forget finished operations older than `max_age`. Returns how many were removed.
    pub async fn prune_finished(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, t| match t.record.finished_at {
            Some(finished) if t.record.status.is_terminal() => finished > cutoff,
            _ => true,
        });
        before - entries.len()
    }

    /// Cancel everything still running and clear all state.
    pub async fn reset(&self) {
        let mut entries = self.entries.write().await;
        for tracked in entries.values() {
            tracked.cancel.cancel();
        }
        entries.clear();
    }
}
