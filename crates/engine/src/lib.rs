pub mod audit_trail;
pub mod backup;
pub mod batch;
pub mod config;
pub mod executor;
pub mod governor;
pub mod progress;
pub mod rate_limit;
pub mod retention;
pub mod rollback;
pub mod validation;

use std::sync::Arc;

use roleshift_core::error::CoreError;
use roleshift_core::migration::OperationStatus;
use roleshift_core::progress::ProgressRecord;
use roleshift_core::types::OperationId;
use roleshift_db::MigrationStore;
use roleshift_events::{EventBus, Notifier};
use serde::Serialize;

pub use audit_trail::{AuditExport, AuditTrail, ExportFormat};
pub use backup::{BackupOptions, BackupReceipt, BackupService, BackupVerification};
pub use batch::{BatchOptions, BatchPlan, BatchReport, BatchRequest, BatchSelector, ItemError, ItemResult, ItemStatus};
pub use config::EngineConfig;
pub use executor::{Actor, AssignRoleRequest, MigrationExecutor, MigrationResult, UserMigrationRequest, UserRef};
pub use governor::{ResourceGovernor, ResourceReport};
pub use progress::{OperationReport, ProgressTracker};
pub use rate_limit::OperatorRateLimiter;
pub use rollback::{RollbackCoordinator, RollbackReport};
pub use validation::{ProductionValidation, ProductionValidator, ValidationChecks};

/// Status of an operation as seen by operators.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OperationProgress {
    /// A batch the tracker still holds.
    Live(ProgressRecord),
    /// Any other recorded operation.
    Stored {
        operation_id: OperationId,
        status: OperationStatus,
        total: usize,
        error_message: Option<String>,
    },
}

/// Every engine service wired against one store.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn MigrationStore>,
    pub config: Arc<EngineConfig>,
    pub executor: MigrationExecutor,
    pub rollback: RollbackCoordinator,
    pub audit: AuditTrail,
    pub backups: BackupService,
    pub validator: ProductionValidator,
    pub tracker: ProgressTracker,
    pub governor: ResourceGovernor,
    pub limiter: OperatorRateLimiter,
}

impl Engine {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        notifier: Arc<dyn Notifier>,
        events: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        let config = Arc::new(config);
        let tracker = ProgressTracker::new();
        let governor = ResourceGovernor::new(config.limits.clone());
        let limiter = OperatorRateLimiter::new(config.rate_limit, config.rate_window);
        let executor = MigrationExecutor::new(
            store.clone(),
            notifier,
            events,
            tracker.clone(),
            governor.clone(),
            limiter.clone(),
            config.clone(),
        );

        Self {
            rollback: RollbackCoordinator::new(executor.clone()),
            audit: AuditTrail::new(store.clone()),
            backups: BackupService::new(store.clone(), config.backup_key),
            validator: ProductionValidator::new(store.clone()),
            store,
            config,
            executor,
            tracker,
            governor,
            limiter,
        }
    }

    /// Live progress if the tracker holds the operation, otherwise the
    /// stored record with any completed rollback taken into account.
    pub async fn operation_status(&self, operation_id: OperationId) -> Result<OperationProgress, CoreError> {
        if let Some(record) = self.tracker.get(operation_id).await {
            return Ok(OperationProgress::Live(record));
        }
        let operation = self
            .store
            .find_operation(operation_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Migration", operation_id))?;
        let rollback = self.store.find_rollback_of(operation_id).await?;
        Ok(OperationProgress::Stored {
            operation_id,
            status: operation.effective_status(rollback.as_ref()),
            total: operation.target_user_ids.len(),
            error_message: operation.error_message,
        })
    }

    /// Final report of a tracked operation.
    pub async fn operation_report(&self, operation_id: OperationId) -> Result<OperationReport, CoreError> {
        match self.tracker.report(operation_id).await {
            Some(report) => Ok(report),
            None if self.tracker.get(operation_id).await.is_some() => Err(CoreError::Conflict(format!(
                "Migration {operation_id} has not finished yet"
            ))),
            None => Err(CoreError::not_found("Migration report", operation_id)),
        }
    }
}
