//! Failure budget shared by every request in one split tree.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts failed split events across all descendants of one items request.
///
/// Cloning shares the counter: every child produced by a split holds the same
/// tracker, so the budget is tree-wide rather than per branch. Increments are
/// atomic, so children may be processed on different threads.
#[derive(Debug, Clone)]
pub struct SplitFailureTracker {
    inner: Arc<TrackerState>,
}

#[derive(Debug)]
struct TrackerState {
    failed_splits: AtomicUsize,
    limit: usize,
}

impl SplitFailureTracker {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(TrackerState {
                failed_splits: AtomicUsize::new(0),
                limit,
            }),
        }
    }

    /// Record one failed split event and return the new total.
    pub fn register_failure(&self) -> usize {
        self.inner.failed_splits.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn limit_reached(&self) -> bool {
        self.failed_splits() >= self.inner.limit
    }

    pub fn failed_splits(&self) -> usize {
        self.inner.failed_splits.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Whether both handles point at the same counter.
    pub fn shares_budget_with(&self, other: &SplitFailureTracker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
