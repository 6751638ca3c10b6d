//! Migration operation records and their lifecycle.
//!
//! An operation is created `pending`, moves to `running`, and ends in one of
//! the terminal statuses. A completed operation is never edited after the
//! fact: rolling it back creates a new operation whose `reverses` points at
//! it, and `rolled_back` is derived from that link.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::roles::Role;
use crate::types::{DbId, OperationId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_PARTIAL_SUCCESS: &str = "partial_success";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_ROLLED_BACK: &str = "rolled_back";

pub const VALID_STATUSES: &[&str] = &[
    STATUS_PENDING,
    STATUS_RUNNING,
    STATUS_COMPLETED,
    STATUS_PARTIAL_SUCCESS,
    STATUS_FAILED,
    STATUS_CANCELLED,
    STATUS_ROLLED_BACK,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    PartialSuccess,
    Failed,
    Cancelled,
    /// Derived only; never stored on the operation itself.
    RolledBack,
}

impl OperationStatus {
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            STATUS_PENDING => Ok(Self::Pending),
            STATUS_RUNNING => Ok(Self::Running),
            STATUS_COMPLETED => Ok(Self::Completed),
            STATUS_PARTIAL_SUCCESS => Ok(Self::PartialSuccess),
            STATUS_FAILED => Ok(Self::Failed),
            STATUS_CANCELLED => Ok(Self::Cancelled),
            STATUS_ROLLED_BACK => Ok(Self::RolledBack),
            _ => Err(CoreError::Validation(format!(
                "Invalid operation status '{s}'. Must be one of: {}",
                VALID_STATUSES.join(", ")
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => STATUS_PENDING,
            Self::Running => STATUS_RUNNING,
            Self::Completed => STATUS_COMPLETED,
            Self::PartialSuccess => STATUS_PARTIAL_SUCCESS,
            Self::Failed => STATUS_FAILED,
            Self::Cancelled => STATUS_CANCELLED,
            Self::RolledBack => STATUS_ROLLED_BACK,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Whether a stored operation may move from `self` to `next`.
    pub fn can_transition(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, PartialSuccess)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

pub const SCOPE_SINGLE: &str = "single";
pub const SCOPE_BATCH: &str = "batch";
pub const SCOPE_ROLLBACK: &str = "rollback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationScope {
    Single,
    Batch,
    Rollback,
}

impl OperationScope {
    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            SCOPE_SINGLE => Ok(Self::Single),
            SCOPE_BATCH => Ok(Self::Batch),
            SCOPE_ROLLBACK => Ok(Self::Rollback),
            _ => Err(CoreError::Validation(format!("Invalid operation scope '{s}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => SCOPE_SINGLE,
            Self::Batch => SCOPE_BATCH,
            Self::Rollback => SCOPE_ROLLBACK,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOperation {
    pub id: OperationId,
    pub scope: OperationScope,
    pub from_role: Option<Role>,
    pub to_role: Option<Role>,
    pub target_user_ids: Vec<DbId>,
    pub status: OperationStatus,
    pub dry_run: bool,
    /// The operation this one compensates, for rollbacks.
    pub reverses: Option<OperationId>,
    pub requested_by: DbId,
    pub reason: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MigrationOperation {
    pub fn new(id: OperationId, scope: OperationScope, requested_by: DbId, now: Timestamp) -> Self {
        Self {
            id,
            scope,
            from_role: None,
            to_role: None,
            target_user_ids: Vec::new(),
            status: OperationStatus::Pending,
            dry_run: false,
            reverses: None,
            requested_by,
            reason: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting anything outside the lifecycle.
    pub fn transition(&mut self, next: OperationStatus, now: Timestamp) -> Result<(), CoreError> {
        if !self.status.can_transition(next) {
            return Err(CoreError::Conflict(format!(
                "Operation {} cannot move from '{}' to '{}'",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Status as reported to operators, taking a completed rollback into account.
    pub fn effective_status(&self, rollback: Option<&MigrationOperation>) -> OperationStatus {
        match rollback {
            Some(rb) if rb.reverses == Some(self.id) && rb.status == OperationStatus::Completed => {
                OperationStatus::RolledBack
            }
            _ => self.status,
        }
    }
}
