//! Per-operator limit on role-change requests.
//!
//! One limiter is created with the engine and shared by every handler, so
//! the counts are process-wide. `reset` clears all windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use roleshift_core::error::CoreError;
use roleshift_core::types::DbId;
use tokio::sync::Mutex;

struct Window {
    started: Instant,
    count: u32,
}

#[derive(Clone)]
pub struct OperatorRateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Arc<Mutex<HashMap<DbId, Window>>>,
}

impl OperatorRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `operator`, failing once the window is full.
    pub async fn check(&self, operator: DbId) -> Result<(), CoreError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        // Drop stale windows so the map only holds active operators.
        windows.retain(|_, w| now.duration_since(w.started) < self.window);

        let entry = windows.entry(operator).or_insert(Window { started: now, count: 0 });
        if entry.count >= self.max_requests {
            let retry_in = self.window.saturating_sub(now.duration_since(entry.started));
            tracing::warn!(operator, retry_in_secs = retry_in.as_secs(), "Role change rate limit reached");
            return Err(CoreError::ResourceLimitExceeded(format!(
                "Too many role changes; limit is {} per {} seconds",
                self.max_requests,
                self.window.as_secs()
            )));
        }
        entry.count += 1;
        Ok(())
    }

    pub async fn reset(&self) {
        self.windows.lock().await.clear();
    }
}
