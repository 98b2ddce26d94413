//! Grouping of claimed tasks into campaign-homogeneous batches.

use std::collections::HashMap;

use crate::domain::{CampaignId, DispatchBatch, SendTask};

/// Partition tasks by campaign.
///
/// Batches come out in order of each campaign's first task; tasks keep the
/// order they arrived in. No size cap.
pub fn partition(tasks: Vec<SendTask>) -> Vec<DispatchBatch> {
    let mut index: HashMap<CampaignId, usize> = HashMap::new();
    let mut batches: Vec<DispatchBatch> = Vec::new();

    for task in tasks {
        let slot = *index.entry(task.campaign_id).or_insert_with(|| {
            batches.push(DispatchBatch::new(task.campaign_id));
            batches.len() - 1
        });
        // Keyed by campaign id, so the push cannot be refused.
        if let Err(task) = batches[slot].push(task) {
            tracing::error!(task_id = %task.id, "task landed in a foreign batch");
        }
    }

    batches
}
