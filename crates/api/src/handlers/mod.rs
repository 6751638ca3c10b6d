pub mod audit;
pub mod maintenance;
pub mod migrations;
pub mod roles;
pub mod users;

use roleshift_core::types::DbId;
use roleshift_engine::UserRef;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Run field validation on a request body.
pub(crate) fn validated<T: Validate>(body: T) -> AppResult<T> {
    body.validate()?;
    Ok(body)
}

/// A single target user, addressed by id or by email (id wins).
pub(crate) fn target_ref(user_id: Option<DbId>, email: Option<String>) -> AppResult<UserRef> {
    match (user_id, email) {
        (Some(id), _) => Ok(UserRef::Id(id)),
        (None, Some(email)) => Ok(UserRef::Email(email)),
        (None, None) => Err(AppError::BadRequest(
            "Either user_id or email is required".into(),
        )),
    }
}
