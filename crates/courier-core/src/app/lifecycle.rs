//! Campaign status transitions driven by the dispatch worker.
//!
//! Completion policy:
//! - `Queued` becomes `In progress` right before its first batch goes out.
//! - After a cycle, a campaign with due unclaimed work keeps its status.
//! - Otherwise it settles once every task is terminal: `Emails Sent` if at
//!   least one task was sent, `Error` if all of them errored. Tasks waiting
//!   for a retry or a later paced send time keep it open.
//! - Settled statuses (`Emails Sent`, `Completed`, `Error`) are never changed.

use chrono::{DateTime, Utc};

use crate::domain::{CampaignId, CampaignStatus, StoreError};
use crate::ports::TaskStore;

/// Move a queued campaign to `In progress`. Returns the new status if it
/// changed.
pub async fn mark_in_progress(
    store: &dyn TaskStore,
    campaign_id: CampaignId,
    at: DateTime<Utc>,
) -> Result<Option<CampaignStatus>, StoreError> {
    let campaign = store.get_campaign(campaign_id).await?;
    if campaign.status != CampaignStatus::Queued {
        return Ok(None);
    }
    store
        .update_campaign_status(campaign_id, CampaignStatus::InProgress, at)
        .await?;
    tracing::info!(%campaign_id, "campaign in progress");
    Ok(Some(CampaignStatus::InProgress))
}

/// Settle the campaign if its tasks allow it. Returns the new status if it
/// changed.
pub async fn refresh_status(
    store: &dyn TaskStore,
    campaign_id: CampaignId,
    at: DateTime<Utc>,
) -> Result<Option<CampaignStatus>, StoreError> {
    let campaign = store.get_campaign(campaign_id).await?;
    if campaign.status.is_settled() {
        return Ok(None);
    }
    if store.has_remaining_unclaimed_due(campaign_id, at).await? {
        return Ok(None);
    }

    let progress = store.campaign_progress(campaign_id).await?;
    let Some(status) = progress.settled_status() else {
        tracing::debug!(
            %campaign_id,
            unclaimed = progress.unclaimed,
            claimed = progress.claimed,
            "campaign still has unresolved tasks"
        );
        return Ok(None);
    };

    store.update_campaign_status(campaign_id, status, at).await?;
    if status == CampaignStatus::Error {
        tracing::warn!(%campaign_id, errored = progress.errored, "every task of the campaign errored");
    } else {
        tracing::info!(
            %campaign_id,
            sent = progress.sent,
            errored = progress.errored,
            "campaign emails sent"
        );
    }
    Ok(Some(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Campaign, Recipient, SendTask, TaskOutcome};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::CampaignWriter;
    use chrono::Duration;

    async fn seeded(status: CampaignStatus, tasks: usize) -> (InMemoryTaskStore, Campaign, Vec<SendTask>) {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let campaign = Campaign::new("c", "admin", now).with_status(status);
        let tasks: Vec<SendTask> = (0..tasks)
            .map(|i| SendTask::new(campaign.id, Recipient::new(format!("t{i}@x.io")), now))
            .collect();
        store.insert_campaign(&campaign).await.unwrap();
        store.insert_tasks(&tasks).await.unwrap();
        (store, campaign, tasks)
    }

    #[tokio::test]
    async fn queued_moves_to_in_progress_once() {
        let (store, campaign, _) = seeded(CampaignStatus::Queued, 1).await;
        assert_eq!(
            mark_in_progress(&store, campaign.id, Utc::now()).await.unwrap(),
            Some(CampaignStatus::InProgress)
        );
        assert_eq!(mark_in_progress(&store, campaign.id, Utc::now()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn not_sent_while_due_tasks_remain() {
        let (store, campaign, tasks) = seeded(CampaignStatus::InProgress, 2).await;
        let now = Utc::now();
        assert!(store.claim(tasks[0].id, "w", now).await.unwrap());
        store.finalize(tasks[0].id, "w", TaskOutcome::Sent).await.unwrap();

        assert_eq!(refresh_status(&store, campaign.id, now).await.unwrap(), None);
        let c = store.get_campaign(campaign.id).await.unwrap();
        assert_eq!(c.status, CampaignStatus::InProgress);
    }

    #[tokio::test]
    async fn retrying_task_keeps_campaign_open() {
        let (store, campaign, tasks) = seeded(CampaignStatus::InProgress, 1).await;
        let now = Utc::now();
        assert!(store.claim(tasks[0].id, "w", now).await.unwrap());
        store
            .release(tasks[0].id, "w", now + Duration::minutes(2), "421")
            .await
            .unwrap();

        assert_eq!(refresh_status(&store, campaign.id, now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn all_errored_settles_as_error() {
        let (store, campaign, tasks) = seeded(CampaignStatus::InProgress, 2).await;
        let now = Utc::now();
        for t in &tasks {
            assert!(store.claim(t.id, "w", now).await.unwrap());
            store
                .finalize(t.id, "w", TaskOutcome::Errored("550".into()))
                .await
                .unwrap();
        }

        assert_eq!(
            refresh_status(&store, campaign.id, now).await.unwrap(),
            Some(CampaignStatus::Error)
        );
        let c = store.get_campaign(campaign.id).await.unwrap();
        assert_eq!(c.completed_at, Some(now));
    }

    #[tokio::test]
    async fn settled_campaigns_are_left_alone() {
        let (store, campaign, tasks) = seeded(CampaignStatus::Completed, 1).await;
        let now = Utc::now();
        assert!(store.claim(tasks[0].id, "w", now).await.unwrap());
        store.finalize(tasks[0].id, "w", TaskOutcome::Sent).await.unwrap();

        assert_eq!(refresh_status(&store, campaign.id, now).await.unwrap(), None);
        let c = store.get_campaign(campaign.id).await.unwrap();
        assert_eq!(c.status, CampaignStatus::Completed);
    }
}
