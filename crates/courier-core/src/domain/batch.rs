//! Dispatch batch: claimed tasks of exactly one campaign.

use super::ids::{CampaignId, TaskId};
use super::task::SendTask;

/// Campaign-homogeneous group of claimed tasks, handed to the delivery
/// backend in one call.
///
/// Homogeneity is enforced on construction: `push` refuses a task of another
/// campaign, so consumers never have to re-check it.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchBatch {
    campaign_id: CampaignId,
    tasks: Vec<SendTask>,
}

impl DispatchBatch {
    pub fn new(campaign_id: CampaignId) -> Self {
        Self {
            campaign_id,
            tasks: Vec::new(),
        }
    }

    /// Append a task, handing it back if it belongs to another campaign.
    pub fn push(&mut self, task: SendTask) -> Result<(), SendTask> {
        if task.campaign_id != self.campaign_id {
            return Err(task);
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    pub fn tasks(&self) -> &[SendTask] {
        &self.tasks
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.iter().map(|t| t.id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<SendTask> {
        self.tasks
    }
}
