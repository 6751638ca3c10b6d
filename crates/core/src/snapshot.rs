//! Pre-migration snapshots and their retention.
//!
//! A snapshot holds the raw state of a user immediately before a committed
//! change, plus its checksum and version. It is restorable only while the
//! change it precedes is still the latest one for that user and the
//! retention window has not elapsed.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::checksum::checksum;
use crate::error::CoreError;
use crate::types::{DbId, OperationId, Timestamp};
use crate::user::UserAggregate;

pub const DEFAULT_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    pub days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl RetentionPolicy {
    pub fn expires_at(&self, taken_at: Timestamp) -> Timestamp {
        taken_at + Duration::days(self.days)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: DbId,
    pub operation_id: OperationId,
    pub bulk_operation_id: Option<OperationId>,
    pub user_id: DbId,
    pub state: serde_json::Value,
    pub checksum: String,
    pub pre_version: i64,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// A snapshot not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    pub operation_id: OperationId,
    pub bulk_operation_id: Option<OperationId>,
    pub user_id: DbId,
    pub state: serde_json::Value,
    pub checksum: String,
    pub pre_version: i64,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl NewSnapshot {
    /// Capture `user` exactly as loaded, before any repair.
    pub fn capture(
        operation_id: OperationId,
        bulk_operation_id: Option<OperationId>,
        user: &UserAggregate,
        retention: RetentionPolicy,
        now: Timestamp,
    ) -> Result<Self, CoreError> {
        let state = serde_json::to_value(user)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize snapshot: {e}")))?;
        Ok(Self {
            operation_id,
            bulk_operation_id,
            user_id: user.id,
            state,
            checksum: checksum(user),
            pre_version: user.version,
            created_at: now,
            expires_at: retention.expires_at(now),
        })
    }
}

impl Snapshot {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Decode the captured state and check it against the stored checksum.
    pub fn restore_state(&self) -> Result<UserAggregate, CoreError> {
        let user: UserAggregate = serde_json::from_value(self.state.clone())
            .map_err(|e| CoreError::Internal(format!("Snapshot {} is unreadable: {e}", self.id)))?;
        let actual = checksum(&user);
        if actual != self.checksum {
            return Err(CoreError::IntegrityCheckFailed {
                user_id: self.user_id,
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(user)
    }

    /// Fail with `RollbackUnavailable` unless `current` is the state written
    /// by the change this snapshot precedes.
    pub fn check_restorable(&self, current: &UserAggregate, now: Timestamp) -> Result<(), CoreError> {
        if self.is_expired(now) {
            return Err(CoreError::RollbackUnavailable(format!(
                "Snapshot for user {} expired at {}",
                self.user_id,
                self.expires_at.to_rfc3339()
            )));
        }
        if current.version != self.pre_version + 1 {
            return Err(CoreError::RollbackUnavailable(format!(
                "User {} has changed since this migration (version {} is newer than {})",
                self.user_id,
                current.version,
                self.pre_version + 1
            )));
        }
        Ok(())
    }
}
