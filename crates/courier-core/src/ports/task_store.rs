//! TaskStore port - the durable source of truth for claims and campaigns.
//!
//! The store is the only resource shared between worker instances, so every
//! claim transition is a single conditional update here. Workers never guard
//! tasks with process-local locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Campaign, CampaignId, CampaignProgress, CampaignStatus, SendTask, StoreError, TaskId,
    TaskOutcome,
};

/// Store operations consumed by the dispatch worker.
///
/// # Claim contract
/// - `claim` succeeds only on an `Unclaimed` task, atomically.
/// - `release` and `finalize` succeed only for the worker holding the claim
///   and fail with `StoreError::NotClaimed` otherwise.
/// - Queries return tasks ordered by send time, then id.
///
/// # Time
/// - Every timestamp written (claim stamps, deferred send times,
///   `completed_at`) is passed in by the caller. Stores never read the wall
///   clock, so a worker driven by `FixedClock` leaves deterministic rows.
///
/// # Thread Safety
/// - `Send + Sync`: one store handle is shared by all workers of a process.
/// - Workers in other processes may hit the same rows; the claim contract
///   holds across them.
///
/// # Implementations
/// - **InMemoryTaskStore**: single process, tests and trial runs
/// - **SqliteTaskStore**: file-backed, shared between processes
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Unclaimed tasks with `send_at <= at`.
    async fn query_due_unclaimed(&self, at: DateTime<Utc>) -> Result<Vec<SendTask>, StoreError>;

    /// Same as `query_due_unclaimed`, restricted to one campaign.
    async fn query_campaign_due_unclaimed(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<Vec<SendTask>, StoreError>;

    /// Unclaimed -> Claimed. `Ok(false)` when someone else got there first.
    async fn claim(
        &self,
        task_id: TaskId,
        worker_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Claimed -> Unclaimed after a failed attempt; counts the attempt and
    /// defers the task to `next_send_at`.
    async fn release(
        &self,
        task_id: TaskId,
        worker_id: &str,
        next_send_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Claimed -> Sent | Errored; counts the attempt.
    async fn finalize(
        &self,
        task_id: TaskId,
        worker_id: &str,
        outcome: TaskOutcome,
    ) -> Result<(), StoreError>;

    /// Return claims taken before `claimed_before` to `Unclaimed` without
    /// counting an attempt. Returns how many were released.
    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>)
    -> Result<usize, StoreError>;

    async fn get_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, StoreError>;

    /// Set the campaign status. Settled statuses stamp `completed_at` with
    /// `at`.
    async fn update_campaign_status(
        &self,
        campaign_id: CampaignId,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Whether any unclaimed task of the campaign is due at `at`.
    async fn has_remaining_unclaimed_due(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn campaign_progress(&self, campaign_id: CampaignId)
    -> Result<CampaignProgress, StoreError>;
}

/// Write side used by the campaign-launch collaborator.
#[async_trait]
pub trait CampaignWriter: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), StoreError>;

    async fn insert_tasks(&self, tasks: &[SendTask]) -> Result<(), StoreError>;

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError>;
}
