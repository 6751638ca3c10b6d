use crate::types::DbId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // -- Role migration failures --------------------------------------------
    #[error("Invalid role: '{0}'")]
    InvalidRole(String),

    #[error("Cannot remove the last admin user")]
    LastAdminProtected,

    #[error("A reason is required when changing a role from or to {0}")]
    ReasonRequired(String),

    #[error("This change modifies your own privileged role and requires explicit confirmation")]
    SelfModificationWarning,

    #[error("User {user_id} was modified by a concurrent operation (expected version {expected_version})")]
    ConcurrencyConflict { user_id: DbId, expected_version: i64 },

    #[error("Data integrity check failed: corrupted fields detected ({})", .fields.join(", "))]
    CorruptionDetected { user_id: DbId, fields: Vec<String> },

    #[error("Data integrity check failed for user {user_id}: checksum mismatch")]
    IntegrityCheckFailed {
        user_id: DbId,
        expected: String,
        actual: String,
    },

    #[error("Rollback unavailable: {0}")]
    RollbackUnavailable(String),

    #[error("Batch partially failed: {failed} of {total} users could not be migrated")]
    PartialBatchFailure { total: usize, failed: usize },

    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),
}

impl CoreError {
    /// Shorthand for a `NotFound` error keyed by a numeric id.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Machine-readable code, used in API error bodies and rejected audit entries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::InvalidRole(_) => "INVALID_ROLE",
            Self::LastAdminProtected => "LAST_ADMIN_PROTECTED",
            Self::ReasonRequired(_) => "REASON_REQUIRED",
            Self::SelfModificationWarning => "SELF_MODIFICATION_WARNING",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::CorruptionDetected { .. } => "CORRUPTION_DETECTED",
            Self::IntegrityCheckFailed { .. } => "INTEGRITY_CHECK_FAILED",
            Self::RollbackUnavailable(_) => "ROLLBACK_UNAVAILABLE",
            Self::PartialBatchFailure { .. } => "PARTIAL_BATCH_FAILURE",
            Self::ResourceLimitExceeded(_) => "RESOURCE_LIMIT_EXCEEDED",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}
