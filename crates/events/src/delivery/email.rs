//! Role-change notices over SMTP.
//!
//! [`EmailDelivery`] wraps the `lettre` async SMTP transport. If `SMTP_HOST`
//! is not set, [`EmailConfig::from_env`] returns `None` and the engine falls
//! back to [`NoopNotifier`](crate::NoopNotifier).

use async_trait::async_trait;

use crate::notifier::{Notifier, NotifyError, RoleChangeNotice};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_FROM_ADDRESS: &str = "noreply@roleshift.local";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set.
    ///
    /// | Variable        | Required | Default                    |
    /// |-----------------|----------|----------------------------|
    /// | `SMTP_HOST`     | yes      | -                          |
    /// | `SMTP_PORT`     | no       | `587`                      |
    /// | `SMTP_FROM`     | no       | `noreply@roleshift.local`  |
    /// | `SMTP_USER`     | no       | -                          |
    /// | `SMTP_PASSWORD` | no       | -                          |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM").unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// Message content
// ---------------------------------------------------------------------------

/// Human-readable label for a role name, e.g. `CONTENT_ADMIN` -> `Content Admin`.
pub fn role_label(role: &str) -> String {
    role.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let lower = w.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn notice_subject(notice: &RoleChangeNotice) -> String {
    format!("Role Updated: {}", role_label(&notice.new_role))
}

pub fn notice_body(notice: &RoleChangeNotice) -> String {
    let mut body = format!(
        "Your account role has changed from {} to {}.\n",
        role_label(&notice.old_role),
        role_label(&notice.new_role)
    );
    if let Some(reason) = notice.reason.as_deref().filter(|r| !r.trim().is_empty()) {
        body.push_str(&format!("Reason: {reason}\n"));
    }
    body.push_str("\nIf you did not expect this change, contact your administrator.\n");
    body
}

// ---------------------------------------------------------------------------
// EmailDelivery
// ---------------------------------------------------------------------------

pub struct EmailDelivery {
    config: EmailConfig,
}

impl EmailDelivery {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub async fn deliver(&self, notice: &RoleChangeNotice) -> Result<(), EmailError> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
            AsyncTransport, Message, Tokio1Executor,
        };

        let email = Message::builder()
            .from(self.config.from_address.parse()?)
            .to(notice.user_email.parse()?)
            .subject(notice_subject(notice))
            .header(ContentType::TEXT_PLAIN)
            .body(notice_body(notice))
            .map_err(|e| EmailError::Build(e.to_string()))?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?.port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder = transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let mailer = transport_builder.build();
        mailer.send(email).await?;

        tracing::info!(to = %notice.user_email, new_role = %notice.new_role, "Role change email sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailDelivery {
    async fn notify_role_change(&self, notice: &RoleChangeNotice) -> Result<(), NotifyError> {
        Ok(self.deliver(notice).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(reason: Option<&str>) -> RoleChangeNotice {
        RoleChangeNotice {
            user_email: "reader@example.com".into(),
            old_role: "LEARNER".into(),
            new_role: "CONTENT_ADMIN".into(),
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn role_labels_are_title_case() {
        assert_eq!(role_label("CONTENT_ADMIN"), "Content Admin");
        assert_eq!(role_label("ADMIN"), "Admin");
    }

    #[test]
    fn subject_and_body_mention_role_and_reason() {
        let n = notice(Some("Promoted to curate books"));
        assert_eq!(notice_subject(&n), "Role Updated: Content Admin");
        let body = notice_body(&n);
        assert!(body.contains("from Learner to Content Admin"));
        assert!(body.contains("Reason: Promoted to curate books"));
    }

    #[test]
    fn blank_reason_is_omitted() {
        assert!(!notice_body(&notice(Some("  "))).contains("Reason:"));
    }

    #[test]
    fn email_error_display_address() {
        let addr_err: Result<lettre::Address, _> = "not-an-email".parse();
        let err = EmailError::Address(addr_err.unwrap_err());
        assert!(err.to_string().contains("Email address parse error"));
    }
}
