use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use roleshift_core::error::CoreError;
use roleshift_core::roles::Role;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `roleshift_core` or the engine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A request body that failed field validation.
    #[error("Invalid request: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::InvalidInput(errors) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", errors.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let AppError::Core(CoreError::InvalidRole(_)) = &self {
            body["valid_roles"] = json!(Role::valid_names());
        }

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a domain error into an HTTP status, error code, and message.
fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    let status = match err {
        CoreError::NotFound { entity, id } => {
            return (
                StatusCode::NOT_FOUND,
                err.code(),
                format!("{entity} with id {id} not found"),
            );
        }
        CoreError::Validation(msg) => return (StatusCode::BAD_REQUEST, err.code(), msg.clone()),
        CoreError::Conflict(msg) => return (StatusCode::CONFLICT, err.code(), msg.clone()),
        CoreError::Unauthorized(msg) => return (StatusCode::UNAUTHORIZED, err.code(), msg.clone()),
        CoreError::Forbidden(msg) => return (StatusCode::FORBIDDEN, err.code(), msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.code(),
                "An internal error occurred".to_string(),
            );
        }
        CoreError::InvalidRole(_) | CoreError::ReasonRequired(_) => StatusCode::BAD_REQUEST,
        CoreError::SelfModificationWarning => StatusCode::PRECONDITION_REQUIRED,
        CoreError::LastAdminProtected
        | CoreError::ConcurrencyConflict { .. }
        | CoreError::RollbackUnavailable(_) => StatusCode::CONFLICT,
        CoreError::CorruptionDetected { .. }
        | CoreError::IntegrityCheckFailed { .. }
        | CoreError::PartialBatchFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::ResourceLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
    };
    (status, err.code(), err.to_string())
}
