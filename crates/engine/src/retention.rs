//! Periodic cleanup of expired snapshots and finished progress records.
//!
//! Snapshots past their expiry can no longer be restored, so they are
//! deleted from the store. Progress records for finished operations are
//! dropped from the tracker once they are older than a day.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use roleshift_db::MigrationStore;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressTracker;

/// How long a finished operation's progress stays queryable.
const PROGRESS_RETENTION_HOURS: i64 = 24;

/// Run one purge pass. Returns `(snapshots_deleted, progress_pruned)`.
pub async fn purge_once(store: &dyn MigrationStore, tracker: &ProgressTracker) -> (u64, usize) {
    let now = Utc::now();
    let deleted = match store.purge_expired_snapshots(now).await {
        Ok(deleted) => deleted,
        Err(e) => {
            tracing::error!(error = %e, "Snapshot retention: purge failed");
            0
        }
    };
    let pruned = tracker
        .prune_finished(chrono::Duration::hours(PROGRESS_RETENTION_HOURS))
        .await;

    if deleted > 0 || pruned > 0 {
        tracing::info!(deleted, pruned, "Snapshot retention: purged expired rows");
    } else {
        tracing::debug!("Snapshot retention: nothing to purge");
    }
    (deleted, pruned)
}

/// Run the retention loop until `cancel` is triggered.
pub async fn run(
    store: Arc<dyn MigrationStore>,
    tracker: ProgressTracker,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = every.as_secs(), "Snapshot retention job started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Snapshot retention job stopping");
                break;
            }
            _ = interval.tick() => {
                purge_once(store.as_ref(), &tracker).await;
            }
        }
    }
}
