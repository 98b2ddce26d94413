//! Campaign launch: turn a campaign and its recipients into paced send tasks.

use crate::domain::{Campaign, CampaignStatus, Recipient, SendTask, StoreError, pace};
use crate::ports::{CampaignWriter, IdGenerator};

/// Build one send task per recipient, spread between the campaign's launch
/// time and its optional `send_by` deadline.
pub fn plan_launch(
    campaign: &Campaign,
    recipients: Vec<Recipient>,
    ids: &dyn IdGenerator,
) -> Vec<SendTask> {
    let send_times = pace(campaign.launch_at, campaign.send_by, recipients.len());
    recipients
        .into_iter()
        .zip(send_times)
        .map(|(recipient, send_at)| {
            SendTask::new(campaign.id, recipient, send_at).with_id(ids.generate_task_id())
        })
        .collect()
}

/// Persist a campaign and its tasks. The campaign is stored `Queued` so the
/// dispatch worker picks it up on its next cycle.
pub async fn launch(
    writer: &dyn CampaignWriter,
    campaign: Campaign,
    recipients: Vec<Recipient>,
    ids: &dyn IdGenerator,
) -> Result<(Campaign, Vec<SendTask>), StoreError> {
    let campaign = campaign.with_status(CampaignStatus::Queued);
    let tasks = plan_launch(&campaign, recipients, ids);

    writer.insert_campaign(&campaign).await?;
    writer.insert_tasks(&tasks).await?;
    tracing::info!(
        campaign_id = %campaign.id,
        tasks = tasks.len(),
        launch_at = %campaign.launch_at,
        "campaign queued"
    );
    Ok((campaign, tasks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{FixedClock, SystemClock, TaskStore, UlidGenerator};
    use chrono::{Duration, TimeZone, Utc};

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient::new(format!("r{i}@x.io")).with_name("R", i.to_string()))
            .collect()
    }

    #[test]
    fn tasks_are_paced_towards_send_by() {
        let launch_at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let campaign = Campaign::new("Paced", "admin", launch_at).with_send_by(launch_at + Duration::hours(1));
        let ids = UlidGenerator::new(FixedClock::new(launch_at));

        let tasks = plan_launch(&campaign, recipients(4), &ids);

        let offsets: Vec<i64> = tasks.iter().map(|t| (t.send_at - launch_at).num_minutes()).collect();
        assert_eq!(offsets, vec![0, 15, 30, 45]);
        assert!(tasks.iter().all(|t| t.campaign_id == campaign.id));
        assert_eq!(tasks[2].recipient.last_name, "2");
    }

    #[tokio::test]
    async fn launch_stores_a_queued_campaign() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let draft = Campaign::new("Launch", "admin", now).with_status(CampaignStatus::Created);

        let (campaign, tasks) = launch(&store, draft, recipients(3), &UlidGenerator::new(SystemClock))
            .await
            .unwrap();

        assert_eq!(campaign.status, CampaignStatus::Queued);
        assert_eq!(store.get_campaign(campaign.id).await.unwrap().status, CampaignStatus::Queued);
        assert_eq!(store.query_due_unclaimed(now).await.unwrap().len(), tasks.len());
    }
}
