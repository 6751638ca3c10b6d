//! Runtime throttling for batch chunks.
//!
//! [`ResourceGovernor`] caps how many chunks run at once with a semaphore,
//! spaces throttled dispatches by the configured interval, and keeps the
//! counters behind the resource report. Spacing is shared: throttled chunks
//! claim consecutive dispatch slots no matter how many are in flight. It is a soft limiter: a chunk waits
//! for a permit, it is never rejected.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use roleshift_core::error::CoreError;
use roleshift_core::governor::GovernorLimits;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Default)]
struct GovernorStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    dispatched: AtomicU64,
    throttle_waits: AtomicU64,
    users_processed: AtomicU64,
    busy_ms: AtomicU64,
}

/// Counters exposed by `GET /maintenance/resource-report`.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub limits: GovernorLimits,
    pub active_chunks: usize,
    pub peak_concurrent_chunks: usize,
    pub chunks_dispatched: u64,
    pub throttle_waits: u64,
    pub users_processed: u64,
    pub average_ms_per_user: f64,
    pub ceiling_exceeded: bool,
}

#[derive(Clone)]
pub struct ResourceGovernor {
    limits: GovernorLimits,
    permits: Arc<Semaphore>,
    /// Earliest instant the next throttled chunk may start.
    next_dispatch: Arc<Mutex<Option<Instant>>>,
    stats: Arc<GovernorStats>,
}

/// Held for the duration of one chunk. Releases the concurrency slot on drop.
pub struct ChunkPermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<GovernorStats>,
}

impl Drop for ChunkPermit {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ResourceGovernor {
    pub fn new(limits: GovernorLimits) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limits.max_concurrency.max(1))),
            limits,
            next_dispatch: Arc::new(Mutex::new(None)),
            stats: Arc::new(GovernorStats::default()),
        }
    }

    pub fn limits(&self) -> &GovernorLimits {
        &self.limits
    }

    /// Wait for a concurrency slot. With `throttle`, first wait for the next
    /// dispatch slot, which lies one throttle interval after the previous
    /// throttled dispatch.
    pub async fn admit(&self, throttle: bool) -> Result<ChunkPermit, CoreError> {
        if throttle && self.limits.throttle_interval_ms > 0 {
            self.wait_for_slot().await;
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal("Chunk scheduler is shut down".into()))?;

        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(active, Ordering::SeqCst);
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        Ok(ChunkPermit {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    async fn wait_for_slot(&self) {
        let interval = Duration::from_millis(self.limits.throttle_interval_ms);
        let now = Instant::now();
        let slot = {
            let mut next = self.next_dispatch.lock().await;
            let slot = next.map_or(now, |earliest| earliest.max(now));
            *next = Some(slot + interval);
            slot
        };
        if slot > now {
            self.stats.throttle_waits.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Account for users handled by a finished batch.
    pub fn record_users(&self, users: usize, elapsed: Duration) {
        self.stats.users_processed.fetch_add(users as u64, Ordering::Relaxed);
        self.stats
            .busy_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn report(&self) -> ResourceReport {
        let users = self.stats.users_processed.load(Ordering::Relaxed);
        let busy_ms = self.stats.busy_ms.load(Ordering::Relaxed);
        let average_ms_per_user = if users == 0 {
            0.0
        } else {
            busy_ms as f64 / users as f64
        };
        let peak = self.stats.peak.load(Ordering::SeqCst);

        ResourceReport {
            limits: self.limits.clone(),
            active_chunks: self.stats.active.load(Ordering::SeqCst),
            peak_concurrent_chunks: peak,
            chunks_dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            throttle_waits: self.stats.throttle_waits.load(Ordering::Relaxed),
            users_processed: users,
            average_ms_per_user,
            ceiling_exceeded: peak > self.limits.max_concurrency
                || average_ms_per_user > self.limits.per_user_ceiling_ms as f64,
        }
    }

    /// Clear the counters. Permits held by running chunks are unaffected.
    pub fn reset(&self) {
        self.stats.peak.store(self.stats.active.load(Ordering::SeqCst), Ordering::SeqCst);
        self.stats.dispatched.store(0, Ordering::Relaxed);
        self.stats.throttle_waits.store(0, Ordering::Relaxed);
        self.stats.users_processed.store(0, Ordering::Relaxed);
        self.stats.busy_ms.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(max_concurrency: usize) -> ResourceGovernor {
        throttled(max_concurrency, 1)
    }

    fn throttled(max_concurrency: usize, throttle_interval_ms: u64) -> ResourceGovernor {
        ResourceGovernor::new(GovernorLimits {
            max_concurrency,
            throttle_interval_ms,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn permits_track_active_and_peak() {
        let gov = throttled(2, 50);
        let a = gov.admit(true).await.unwrap();
        let b = gov.admit(true).await.unwrap();
        assert_eq!(gov.report().active_chunks, 2);
        drop(a);
        drop(b);

        let report = gov.report();
        assert_eq!(report.active_chunks, 0);
        assert_eq!(report.peak_concurrent_chunks, 2);
        assert_eq!(report.chunks_dispatched, 2);
        assert_eq!(report.throttle_waits, 1);
        assert!(!report.ceiling_exceeded);
    }

    #[tokio::test]
    async fn concurrency_is_capped() {
        let gov = governor(1);
        let held = gov.admit(false).await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(20), gov.admit(false)).await;
        assert!(waiting.is_err());
        drop(held);
        assert!(gov.admit(false).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_throttled_admits_are_spaced() {
        let gov = throttled(4, 50);
        let started = Instant::now();
        let admits = (0..4).map(|_| {
            let gov = gov.clone();
            async move {
                let _permit = gov.admit(true).await.unwrap();
                Instant::now()
            }
        });
        let mut dispatched = futures::future::join_all(admits).await;
        dispatched.sort();

        assert!(dispatched[3] - started >= Duration::from_millis(150));
        assert_eq!(gov.report().throttle_waits, 3);
    }

    #[test]
    fn average_above_ceiling_is_reported() {
        let gov = governor(1);
        gov.record_users(2, Duration::from_millis(500));
        let report = gov.report();
        assert_eq!(report.average_ms_per_user, 250.0);
        assert!(report.ceiling_exceeded);

        gov.reset();
        assert_eq!(gov.report().users_processed, 0);
    }
}
