//! Claim state of a send task and lifecycle status of a campaign.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Claim state of a send task.
///
/// State transitions:
/// - Unclaimed -> Claimed -> Sent
/// - Unclaimed -> Claimed -> Unclaimed (released after a transient failure)
/// - Unclaimed -> Claimed -> Errored (permanent failure or attempts exhausted)
///
/// Claimed -> Claimed never happens: a second claim needs a release first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    /// Waiting for its send time or for a worker to pick it up.
    Unclaimed,

    /// Held by exactly one worker for the duration of a dispatch attempt.
    Claimed,

    /// Handed to the delivery backend successfully.
    Sent,

    /// Failed permanently.
    Errored,
}

impl ClaimState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ClaimState::Sent | ClaimState::Errored)
    }

    pub fn is_claimable(self) -> bool {
        matches!(self, ClaimState::Unclaimed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClaimState::Unclaimed => "unclaimed",
            ClaimState::Claimed => "claimed",
            ClaimState::Sent => "sent",
            ClaimState::Errored => "errored",
        }
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unclaimed" => Ok(Self::Unclaimed),
            "claimed" => Ok(Self::Claimed),
            "sent" => Ok(Self::Sent),
            "errored" => Ok(Self::Errored),
            other => Err(format!("unknown claim state: {other}")),
        }
    }
}

/// Campaign lifecycle status, persisted and shown to the UI/API layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CampaignStatus {
    #[serde(rename = "Created")]
    Created,
    #[serde(rename = "Queued")]
    Queued,
    #[serde(rename = "In progress")]
    InProgress,
    #[serde(rename = "Emails Sent")]
    EmailsSent,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Error")]
    Error,
}

impl CampaignStatus {
    /// Statuses the dispatch worker never moves a campaign out of.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            CampaignStatus::EmailsSent | CampaignStatus::Completed | CampaignStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Created => "Created",
            CampaignStatus::Queued => "Queued",
            CampaignStatus::InProgress => "In progress",
            CampaignStatus::EmailsSent => "Emails Sent",
            CampaignStatus::Completed => "Completed",
            CampaignStatus::Error => "Error",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(Self::Created),
            "Queued" => Ok(Self::Queued),
            "In progress" => Ok(Self::InProgress),
            "Emails Sent" => Ok(Self::EmailsSent),
            "Completed" => Ok(Self::Completed),
            "Error" => Ok(Self::Error),
            other => Err(format!("unknown campaign status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ClaimState::Unclaimed, false, true)]
    #[case(ClaimState::Claimed, false, false)]
    #[case(ClaimState::Sent, true, false)]
    #[case(ClaimState::Errored, true, false)]
    fn claim_state_predicates(
        #[case] state: ClaimState,
        #[case] terminal: bool,
        #[case] claimable: bool,
    ) {
        assert_eq!(state.is_terminal(), terminal);
        assert_eq!(state.is_claimable(), claimable);
        assert_eq!(state.as_str().parse::<ClaimState>().unwrap(), state);
    }

    #[test]
    fn campaign_status_uses_display_names_on_the_wire() {
        let s = serde_json::to_string(&CampaignStatus::EmailsSent).unwrap();
        assert_eq!(s, "\"Emails Sent\"");
        let back: CampaignStatus = serde_json::from_str("\"In progress\"").unwrap();
        assert_eq!(back, CampaignStatus::InProgress);
        assert_eq!(
            "In progress".parse::<CampaignStatus>().unwrap(),
            CampaignStatus::InProgress
        );
    }

    #[test]
    fn only_terminal_campaign_statuses_are_settled() {
        assert!(!CampaignStatus::Queued.is_settled());
        assert!(!CampaignStatus::InProgress.is_settled());
        assert!(CampaignStatus::EmailsSent.is_settled());
        assert!(CampaignStatus::Error.is_settled());
    }
}
