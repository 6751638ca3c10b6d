//! Role-based access control extractor.
//!
//! Every engine endpoint is admin-only; handlers take [`RequireAdmin`]
//! instead of [`AuthUser`] to enforce that at the type level.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use roleshift_core::error::CoreError;
use roleshift_core::roles::Role;

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Requires the `ADMIN` role. Rejects with 403 Forbidden otherwise.
///
/// ```ignore
/// async fn admin_only(RequireAdmin(user): RequireAdmin) -> AppResult<Json<()>> {
///     // user is guaranteed to be an admin here
///     Ok(Json(()))
/// }
/// ```
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin.as_str() {
            tracing::warn!(user_id = user.user_id, role = %user.role, "Rejected non-admin operator");
            return Err(AppError::Core(CoreError::Forbidden(
                "Insufficient permissions".into(),
            )));
        }
        Ok(RequireAdmin(user))
    }
}
