//! Batch limits and the duration cost model.
//!
//! Estimates assume a fixed per-user cost, chunks executed `concurrency` at a
//! time, and one throttle interval between chunk dispatches when throttling
//! is on. They are guidance for operators, not guarantees.

use serde::Serialize;

use crate::error::CoreError;
use crate::types::DbId;

pub const DEFAULT_CHUNK_SIZE: usize = 10;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_THROTTLE_MS: u64 = 50;
pub const DEFAULT_MAX_BATCH_USERS: usize = 10_000;
pub const DEFAULT_PER_USER_COST_MS: u64 = 5;
pub const DEFAULT_PER_USER_CEILING_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GovernorLimits {
    pub chunk_size: usize,
    pub max_concurrency: usize,
    pub throttle_interval_ms: u64,
    pub max_batch_users: usize,
    pub per_user_cost_ms: u64,
    /// Average milliseconds per user above which a batch report flags the run.
    pub per_user_ceiling_ms: u64,
}

impl Default for GovernorLimits {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            throttle_interval_ms: DEFAULT_THROTTLE_MS,
            max_batch_users: DEFAULT_MAX_BATCH_USERS,
            per_user_cost_ms: DEFAULT_PER_USER_COST_MS,
            per_user_ceiling_ms: DEFAULT_PER_USER_CEILING_MS,
        }
    }
}

impl GovernorLimits {
    /// Chunk size for a request, clamped to `1..=max(chunk_size, 1000)`.
    pub fn effective_chunk_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.chunk_size)
            .clamp(1, self.chunk_size.max(1000))
    }

    pub fn check_batch_size(&self, total: usize) -> Result<(), CoreError> {
        if total > self.max_batch_users {
            return Err(CoreError::ResourceLimitExceeded(format!(
                "Batch of {total} users exceeds the limit of {}",
                self.max_batch_users
            )));
        }
        Ok(())
    }

    /// Estimated wall-clock milliseconds for a batch of `total` users.
    pub fn estimate_duration_ms(&self, total: usize, chunk_size: usize, parallel: bool, throttle: bool) -> u64 {
        if total == 0 {
            return 0;
        }
        let chunks = chunk_count(total, chunk_size);
        let waves = if parallel {
            chunks.div_ceil(self.max_concurrency.max(1))
        } else {
            chunks
        };
        let per_chunk = chunk_size.min(total) as u64 * self.per_user_cost_ms;
        let throttle_ms = if throttle {
            (chunks.saturating_sub(1)) as u64 * self.throttle_interval_ms
        } else {
            0
        };
        waves as u64 * per_chunk + throttle_ms
    }
}

pub fn chunk_count(total: usize, chunk_size: usize) -> usize {
    total.div_ceil(chunk_size.max(1))
}

/// A user a dry run expects to fail, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PotentialIssue {
    pub user_id: Option<DbId>,
    pub email: Option<String>,
    pub issue: String,
}

/// What a batch would do, computed without mutating anything.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub dry_run: bool,
    pub total_users: usize,
    pub would_migrate: usize,
    pub would_skip: usize,
    pub would_fail: usize,
    pub chunks: usize,
    pub estimated_duration_ms: u64,
    pub potential_issues: Vec<PotentialIssue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(0, 10), 0);
        assert_eq!(chunk_count(10, 10), 1);
        assert_eq!(chunk_count(11, 10), 2);
        assert_eq!(chunk_count(5, 0), 5);
    }

    #[test]
    fn batch_size_limit() {
        let limits = GovernorLimits {
            max_batch_users: 3,
            ..Default::default()
        };
        assert!(limits.check_batch_size(3).is_ok());
        assert_matches!(limits.check_batch_size(4), Err(CoreError::ResourceLimitExceeded(_)));
    }

    #[test]
    fn sequential_estimate() {
        let limits = GovernorLimits::default();
        // 25 users, chunks of 10: 3 chunks of 50ms each, plus 2 throttle gaps.
        assert_eq!(limits.estimate_duration_ms(25, 10, false, true), 3 * 50 + 2 * 50);
        assert_eq!(limits.estimate_duration_ms(25, 10, false, false), 150);
    }

    #[test]
    fn parallel_estimate_uses_waves() {
        let limits = GovernorLimits::default();
        // 8 chunks across 4 workers: 2 waves.
        assert_eq!(limits.estimate_duration_ms(80, 10, true, false), 2 * 50);
    }

    #[test]
    fn empty_batch_costs_nothing() {
        assert_eq!(GovernorLimits::default().estimate_duration_ms(0, 10, true, true), 0);
    }

    #[test]
    fn chunk_size_is_clamped() {
        let limits = GovernorLimits::default();
        assert_eq!(limits.effective_chunk_size(None), DEFAULT_CHUNK_SIZE);
        assert_eq!(limits.effective_chunk_size(Some(0)), 1);
        assert_eq!(limits.effective_chunk_size(Some(5000)), 1000);
    }
}
