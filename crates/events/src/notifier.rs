//! Role-change notices sent to affected users.
//!
//! A failed notification never fails the role change that triggered it; the
//! engine logs the error and moves on.

use async_trait::async_trait;
use serde::Serialize;

use crate::delivery::email::EmailError;

/// What a user is told when their role changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleChangeNotice {
    pub user_email: String,
    pub old_role: String,
    pub new_role: String,
    pub reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_role_change(&self, notice: &RoleChangeNotice) -> Result<(), NotifyError>;
}

/// Used when no delivery channel is configured. Logs and drops the notice.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_role_change(&self, notice: &RoleChangeNotice) -> Result<(), NotifyError> {
        tracing::debug!(
            to = %notice.user_email,
            new_role = %notice.new_role,
            "No notification channel configured, skipping role change notice",
        );
        Ok(())
    }
}
