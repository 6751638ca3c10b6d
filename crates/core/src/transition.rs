//! Role transition rules.
//!
//! `TransitionValidator::evaluate` is a pure function of the request and the
//! current privileged-user count; it never touches storage.

use serde::Serialize;

use crate::error::CoreError;
use crate::roles::{is_sensitive_change, Role};
use crate::types::DbId;
use crate::user::UserAggregate;

/// Longest accepted change reason, in characters.
pub const MAX_REASON_LENGTH: usize = 500;

pub struct TransitionRequest<'a> {
    pub target: &'a UserAggregate,
    pub new_role: Option<&'a str>,
    pub reason: Option<&'a str>,
    pub requested_by: DbId,
    /// Number of users currently holding the privileged role.
    pub privileged_count: i64,
}

/// The outcome of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Approval {
    pub old_role: Role,
    pub new_role: Role,
    pub sensitive: bool,
    /// The operator is changing their own privileged role. The caller decides
    /// whether to demand confirmation.
    pub self_modification: bool,
    /// The user already holds the requested role.
    pub no_op: bool,
}

pub struct TransitionValidator;

impl TransitionValidator {
    /// Check, in order: role validity, the last-admin guard, the reason
    /// requirement for sensitive changes, and self-modification.
    pub fn evaluate(req: &TransitionRequest<'_>) -> Result<Approval, CoreError> {
        let new_role = Role::parse_input(req.new_role)?;
        let old_role = req.target.role;

        if let Some(reason) = req.reason {
            if reason.chars().count() > MAX_REASON_LENGTH {
                return Err(CoreError::Validation(format!(
                    "Reason must be at most {MAX_REASON_LENGTH} characters"
                )));
            }
        }

        if old_role == new_role {
            return Ok(Approval {
                old_role,
                new_role,
                sensitive: false,
                self_modification: false,
                no_op: true,
            });
        }

        if old_role.is_privileged() && !new_role.is_privileged() && req.privileged_count <= 1 {
            return Err(CoreError::LastAdminProtected);
        }

        let sensitive = is_sensitive_change(old_role, new_role);
        if sensitive && req.reason.map(str::trim).unwrap_or_default().is_empty() {
            return Err(CoreError::ReasonRequired(Role::Admin.as_str().to_string()));
        }

        Ok(Approval {
            old_role,
            new_role,
            sensitive,
            self_modification: sensitive && req.requested_by == req.target.id,
            no_op: false,
        })
    }
}
