//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`MigrationEvent`]s to any number of subscribers.
//! It is shared via `Arc<EventBus>` between the engine and the API.

use chrono::{DateTime, Utc};
use roleshift_core::types::{DbId, OperationId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Known event names.
pub mod event_types {
    pub const ROLE_CHANGED: &str = "role.changed";
    pub const ROLE_CHANGE_REJECTED: &str = "role.change_rejected";
    pub const BATCH_STARTED: &str = "migration.batch_started";
    pub const BATCH_FINISHED: &str = "migration.batch_finished";
    pub const BATCH_CANCELLED: &str = "migration.batch_cancelled";
    pub const ROLLED_BACK: &str = "migration.rolled_back";
}

// ---------------------------------------------------------------------------
// MigrationEvent
// ---------------------------------------------------------------------------

/// Something that happened to a user's role or to a migration operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationEvent {
    /// Dot-separated event name, one of [`event_types`].
    pub event_type: String,
    pub operation_id: Option<OperationId>,
    pub user_id: Option<DbId>,
    pub actor_user_id: Option<DbId>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl MigrationEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            operation_id: None,
            user_id: None,
            actor_user_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    pub fn with_user(mut self, user_id: DbId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_actor(mut self, user_id: DbId) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<MigrationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest messages are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: MigrationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
