//! Batch progress records.
//!
//! Counters only grow, and `processed` equals `successful + failed` at all
//! times. The outcome of the last item is held back until the owner calls
//! [`ProgressRecord::finish`], so an observer never sees `processed == total`
//! on a running batch, and never sees a terminal status before the owner has
//! persisted whatever goes with it.

use chrono::Utc;
use serde::Serialize;

use crate::migration::OperationStatus;
use crate::types::{OperationId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub operation_id: OperationId,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub status: OperationStatus,
    pub percent_complete: f64,
    pub started_at: Timestamp,
    pub updated_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    /// Without this, a single failure makes the batch `failed` rather
    /// than `partial_success`.
    #[serde(skip)]
    pub continue_on_error: bool,
    /// Outcome of the final item, applied by `finish`.
    #[serde(skip)]
    held: Option<ItemOutcome>,
}

impl ProgressRecord {
    /// A running record. It stays running, even with `total == 0`, until
    /// `finish` is called.
    pub fn new(operation_id: OperationId, total: usize, continue_on_error: bool) -> Self {
        let now = Utc::now();
        Self {
            operation_id,
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            status: OperationStatus::Running,
            percent_complete: 0.0,
            started_at: now,
            updated_at: now,
            finished_at: None,
            continue_on_error,
            held: None,
        }
    }

    /// Record one item. Ignored once the record is terminal or every item
    /// has been recorded.
    pub fn record(&mut self, outcome: ItemOutcome) {
        if self.status.is_terminal() || self.is_settled() {
            return;
        }
        if self.processed + 1 == self.total {
            self.held = Some(outcome);
            return;
        }
        self.apply(outcome);
        self.updated_at = Utc::now();
    }

    /// Whether every item has been recorded, including a held final one.
    pub fn is_settled(&self) -> bool {
        self.processed + usize::from(self.held.is_some()) >= self.total
    }

    /// The status the batch settles in once every item has been recorded,
    /// or `None` while items are outstanding.
    pub fn settled_status(&self) -> Option<OperationStatus> {
        if !self.is_settled() {
            return None;
        }
        let failed = self.failed + usize::from(self.held == Some(ItemOutcome::Failed));
        let successful = self.successful + usize::from(self.held == Some(ItemOutcome::Succeeded));
        let status = if failed == 0 {
            OperationStatus::Completed
        } else if !self.continue_on_error || successful == 0 {
            OperationStatus::Failed
        } else {
            OperationStatus::PartialSuccess
        };
        Some(status)
    }

    /// Make the record terminal with `status`, applying any held outcome.
    /// No-op if already terminal.
    pub fn finish(&mut self, status: OperationStatus) {
        if self.status.is_terminal() {
            return;
        }
        if let Some(outcome) = self.held.take() {
            self.apply(outcome);
        }
        let now = Utc::now();
        self.status = status;
        self.percent_complete = percent(self.processed, self.total);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    fn apply(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => self.successful += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
        self.processed += 1;
        self.percent_complete = percent(self.processed, self.total);
    }
}

fn percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (processed as f64 / total as f64 * 1000.0).round() / 10.0
}
