//! Campaign record and its aggregated task progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::CampaignId;
use super::state::{CampaignStatus, ClaimState};
use super::task::SendTask;

/// A campaign groups the send tasks of one launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub owner: String,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub launch_at: DateTime<Utc>,

    /// Optional deadline over which sends are spread (see `pace`).
    pub send_by: Option<DateTime<Utc>>,

    /// Set when the campaign reaches a settled status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(name: impl Into<String>, owner: impl Into<String>, launch_at: DateTime<Utc>) -> Self {
        Self {
            id: CampaignId::generate(),
            name: name.into(),
            owner: owner.into(),
            status: CampaignStatus::Queued,
            created_at: Utc::now(),
            launch_at,
            send_by: None,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, id: CampaignId) -> Self {
        self.id = id;
        self
    }

    pub fn with_status(mut self, status: CampaignStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_send_by(mut self, send_by: DateTime<Utc>) -> Self {
        self.send_by = Some(send_by);
        self
    }
}

/// Per-state task counts of one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub unclaimed: usize,
    pub claimed: usize,
    pub sent: usize,
    pub errored: usize,
}

impl CampaignProgress {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a SendTask>) -> Self {
        let mut progress = Self::default();
        for task in tasks {
            progress.record(task.state);
        }
        progress
    }

    pub fn record(&mut self, state: ClaimState) {
        self.add(state, 1);
    }

    pub fn add(&mut self, state: ClaimState, count: usize) {
        match state {
            ClaimState::Unclaimed => self.unclaimed += count,
            ClaimState::Claimed => self.claimed += count,
            ClaimState::Sent => self.sent += count,
            ClaimState::Errored => self.errored += count,
        }
    }

    pub fn total(&self) -> usize {
        self.unclaimed + self.claimed + self.sent + self.errored
    }

    /// Tasks that may still be dispatched (waiting, retrying or in flight).
    pub fn unresolved(&self) -> usize {
        self.unclaimed + self.claimed
    }

    /// Status the campaign should settle in, or `None` while work remains.
    ///
    /// - anything unresolved: `None`
    /// - all terminal, at least one sent: `EmailsSent`
    /// - all terminal, none sent: `Error`
    /// - no tasks at all: `None` (nothing has been launched yet)
    pub fn settled_status(&self) -> Option<CampaignStatus> {
        if self.total() == 0 || self.unresolved() > 0 {
            None
        } else if self.sent > 0 {
            Some(CampaignStatus::EmailsSent)
        } else {
            Some(CampaignStatus::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::Recipient;
    use rstest::rstest;

    fn progress(unclaimed: usize, claimed: usize, sent: usize, errored: usize) -> CampaignProgress {
        CampaignProgress {
            unclaimed,
            claimed,
            sent,
            errored,
        }
    }

    #[test]
    fn new_campaign_starts_queued() {
        let c = Campaign::new("Q3 awareness", "admin", Utc::now());
        assert_eq!(c.status, CampaignStatus::Queued);
        assert!(c.completed_at.is_none());
    }

    #[rstest]
    #[case::all_sent(progress(0, 0, 5, 0), Some(CampaignStatus::EmailsSent))]
    #[case::sent_and_errored(progress(0, 0, 4, 1), Some(CampaignStatus::EmailsSent))]
    #[case::all_errored(progress(0, 0, 0, 3), Some(CampaignStatus::Error))]
    #[case::waiting(progress(1, 0, 4, 0), None)]
    #[case::in_flight(progress(0, 1, 4, 0), None)]
    #[case::empty(progress(0, 0, 0, 0), None)]
    fn settled_status_policy(
        #[case] counts: CampaignProgress,
        #[case] expected: Option<CampaignStatus>,
    ) {
        assert_eq!(counts.settled_status(), expected);
    }

    #[test]
    fn counts_tasks_by_state() {
        let campaign = CampaignId::generate();
        let mut tasks: Vec<SendTask> = (0..3)
            .map(|i| {
                SendTask::new(
                    campaign,
                    Recipient::new(format!("t{i}@example.com")),
                    Utc::now(),
                )
            })
            .collect();
        tasks[0].state = ClaimState::Sent;
        tasks[1].state = ClaimState::Claimed;

        let p = CampaignProgress::from_tasks(&tasks);
        assert_eq!(p, progress(1, 1, 1, 0));
        assert_eq!(p.total(), 3);
        assert_eq!(p.unresolved(), 2);
    }
}
