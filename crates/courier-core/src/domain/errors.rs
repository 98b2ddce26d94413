//! Error types for the store, the delivery backend and the dispatch cycle.

use thiserror::Error;

use super::ids::{CampaignId, TaskId};

/// Task store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The conditional update matched nothing: the caller does not hold the
    /// claim (never claimed, already finalized, or reclaimed after timing out).
    #[error("{task_id} is not claimed by {worker_id}")]
    NotClaimed { task_id: TaskId, worker_id: String },

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking store call failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Batch-level delivery failures.
///
/// Per-task failures are reported through `DeliveryReport` instead; this is
/// for when the backend could not look at the batch at all.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Worth retrying on a later cycle.
    #[error("delivery backend unavailable: {0}")]
    Unavailable(String),

    /// The whole batch is undeliverable.
    #[error("batch rejected: {0}")]
    Rejected(String),

    /// The backend has shut down.
    #[error("delivery backend closed")]
    Closed,
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Rejected(_))
    }
}

/// Cycle-level failure. Only an unreadable store aborts a cycle.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
