//! In-memory task store.
//!
//! Single-process only, but the claim semantics match the SQLite store: every
//! transition runs under one lock, so concurrent workers in the same process
//! race exactly like they would against a database row.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Campaign, CampaignId, CampaignProgress, CampaignStatus, ClaimState, SendTask, StoreError,
    TaskId, TaskOutcome,
};
use crate::ports::{CampaignWriter, TaskStore};

#[derive(Default)]
struct InMemoryState {
    /// All campaigns (single source of truth).
    campaigns: HashMap<CampaignId, Campaign>,

    /// All send tasks (single source of truth).
    tasks: HashMap<TaskId, SendTask>,

    /// Campaigns in insertion order, for listing.
    campaign_order: Vec<CampaignId>,
}

impl InMemoryState {
    fn due(&self, at: DateTime<Utc>, campaign: Option<CampaignId>) -> Vec<SendTask> {
        let mut due: Vec<SendTask> = self
            .tasks
            .values()
            .filter(|t| t.is_due(at))
            .filter(|t| campaign.is_none_or(|c| t.campaign_id == c))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.send_at.cmp(&b.send_at).then(a.id.cmp(&b.id)));
        due
    }

    fn claimed_mut(&mut self, task_id: TaskId, worker_id: &str) -> Result<&mut SendTask, StoreError> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        if !task.is_claimed_by(worker_id) {
            return Err(StoreError::NotClaimed {
                task_id,
                worker_id: worker_id.to_string(),
            });
        }
        Ok(task)
    }
}

/// Task store backed by process memory.
///
/// Cloning shares the underlying state, so several workers can be handed the
/// same store.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while offline every call fails with
    /// `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<SendTask> {
        self.state.lock().await.tasks.get(&task_id).cloned()
    }

    /// Tasks of one campaign, ordered like the due queries.
    pub async fn tasks_of(&self, campaign_id: CampaignId) -> Vec<SendTask> {
        let state = self.state.lock().await;
        let mut tasks: Vec<SendTask> = state
            .tasks
            .values()
            .filter(|t| t.campaign_id == campaign_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.send_at.cmp(&b.send_at).then(a.id.cmp(&b.id)));
        tasks
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn query_due_unclaimed(&self, at: DateTime<Utc>) -> Result<Vec<SendTask>, StoreError> {
        self.check_online()?;
        Ok(self.state.lock().await.due(at, None))
    }

    async fn query_campaign_due_unclaimed(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<Vec<SendTask>, StoreError> {
        self.check_online()?;
        Ok(self.state.lock().await.due(at, Some(campaign_id)))
    }

    async fn claim(
        &self,
        task_id: TaskId,
        worker_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        Ok(task.try_claim(worker_id, at))
    }

    async fn release(
        &self,
        task_id: TaskId,
        worker_id: &str,
        next_send_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state
            .claimed_mut(task_id, worker_id)?
            .release(next_send_at, error.to_string());
        Ok(())
    }

    async fn finalize(
        &self,
        task_id: TaskId,
        worker_id: &str,
        outcome: TaskOutcome,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.claimed_mut(task_id, worker_id)?.finalize(outcome);
        Ok(())
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let mut released = 0;
        for task in state.tasks.values_mut() {
            let stale = task.state == ClaimState::Claimed
                && task.claimed_at.is_some_and(|t| t < claimed_before);
            if stale {
                task.release_stale();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn get_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, StoreError> {
        self.check_online()?;
        self.state
            .lock()
            .await
            .campaigns
            .get(&campaign_id)
            .cloned()
            .ok_or(StoreError::CampaignNotFound(campaign_id))
    }

    async fn update_campaign_status(
        &self,
        campaign_id: CampaignId,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let campaign = state
            .campaigns
            .get_mut(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;
        campaign.status = status;
        if status.is_settled() {
            campaign.completed_at = Some(at);
        }
        Ok(())
    }

    async fn has_remaining_unclaimed_due(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .any(|t| t.campaign_id == campaign_id && t.is_due(at)))
    }

    async fn campaign_progress(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CampaignProgress, StoreError> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(CampaignProgress::from_tasks(
            state.tasks.values().filter(|t| t.campaign_id == campaign_id),
        ))
    }
}

#[async_trait]
impl CampaignWriter for InMemoryTaskStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        if state.campaigns.insert(campaign.id, campaign.clone()).is_none() {
            state.campaign_order.push(campaign.id);
        }
        Ok(())
    }

    async fn insert_tasks(&self, tasks: &[SendTask]) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        if let Some(orphan) = tasks
            .iter()
            .find(|t| !state.campaigns.contains_key(&t.campaign_id))
        {
            return Err(StoreError::CampaignNotFound(orphan.campaign_id));
        }
        for task in tasks {
            state.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        self.check_online()?;
        let state = self.state.lock().await;
        Ok(state
            .campaign_order
            .iter()
            .filter_map(|id| state.campaigns.get(id).cloned())
            .collect())
    }
}
