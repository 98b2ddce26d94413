//! Per-cycle counters, logged by the worker loop and printed by the CLI.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Tasks returned by the due query.
    pub due: usize,
    pub claimed: usize,
    /// Claims lost to another worker.
    pub conflicts: usize,
    pub claim_errors: usize,
    pub batches: usize,
    pub sent: usize,
    pub retried: usize,
    pub errored: usize,
    /// Failed release/finalize/status writes.
    pub store_errors: usize,
    /// Stale claims handed back before the query.
    pub stale_released: usize,
    pub campaigns_started: usize,
    pub campaigns_settled: usize,
}

impl CycleReport {
    /// Nothing was due and nothing was recovered.
    pub fn is_idle(&self) -> bool {
        self.due == 0 && self.stale_released == 0
    }

    pub fn merge(&mut self, other: &CycleReport) {
        self.due += other.due;
        self.claimed += other.claimed;
        self.conflicts += other.conflicts;
        self.claim_errors += other.claim_errors;
        self.batches += other.batches;
        self.sent += other.sent;
        self.retried += other.retried;
        self.errored += other.errored;
        self.store_errors += other.store_errors;
        self.stale_released += other.stale_released;
        self.campaigns_started += other.campaigns_started;
        self.campaigns_settled += other.campaigns_settled;
    }
}
