use std::sync::Arc;

use roleshift_engine::Engine;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Every migration service, wired against one store.
    pub engine: Engine,
    /// Server configuration (for access in handlers if needed).
    pub config: Arc<ServerConfig>,
}
