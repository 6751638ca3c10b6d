//! Role migration events and user notifications.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`MigrationEvent`]: the event envelope published by the engine.
//! - [`Notifier`]: delivery seam for role-change notices, with an SMTP
//!   implementation in [`delivery::email`].

pub mod bus;
pub mod delivery;
pub mod notifier;

pub use bus::{event_types, EventBus, MigrationEvent};
pub use delivery::email::{EmailConfig, EmailDelivery};
pub use notifier::{NoopNotifier, Notifier, NotifyError, RoleChangeNotice};
