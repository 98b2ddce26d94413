//! Send task ("mail log entry"): one scheduled email to one recipient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CampaignId, TaskId};
use super::state::ClaimState;

/// Who the email goes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub position: String,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: String::new(),
            last_name: String::new(),
            position: String::new(),
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }
}

/// Final result recorded by `finalize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum TaskOutcome {
    Sent,
    Errored(String),
}

/// One send task.
///
/// The record is the single source of truth for claim state. Stores apply
/// transitions through the methods below so both implementations agree on
/// what each transition touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendTask {
    pub id: TaskId,
    pub campaign_id: CampaignId,
    pub recipient: Recipient,

    /// Earliest time the task may be dispatched. Pushed back on release.
    pub send_at: DateTime<Utc>,

    pub state: ClaimState,

    /// Worker holding the claim (only while `Claimed`).
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,

    /// Number of finished dispatch attempts.
    pub attempts: u32,

    pub last_error: Option<String>,
}

impl SendTask {
    pub fn new(campaign_id: CampaignId, recipient: Recipient, send_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::generate(),
            campaign_id,
            recipient,
            send_at,
            state: ClaimState::Unclaimed,
            claimed_by: None,
            claimed_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Eligible for `query_due_unclaimed(at)`.
    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.state.is_claimable() && self.send_at <= at
    }

    pub fn is_claimed_by(&self, worker_id: &str) -> bool {
        self.state == ClaimState::Claimed && self.claimed_by.as_deref() == Some(worker_id)
    }

    /// Unclaimed -> Claimed. Returns false (and changes nothing) otherwise.
    pub fn try_claim(&mut self, worker_id: &str, at: DateTime<Utc>) -> bool {
        if !self.state.is_claimable() {
            return false;
        }
        self.state = ClaimState::Claimed;
        self.claimed_by = Some(worker_id.to_string());
        self.claimed_at = Some(at);
        true
    }

    /// Claimed -> Unclaimed after a failed attempt.
    pub fn release(&mut self, next_send_at: DateTime<Utc>, error: String) {
        self.state = ClaimState::Unclaimed;
        self.attempts += 1;
        self.send_at = next_send_at;
        self.last_error = Some(error);
        self.clear_claim();
    }

    /// Claimed -> Unclaimed without counting an attempt (the holder vanished).
    pub fn release_stale(&mut self) {
        self.state = ClaimState::Unclaimed;
        self.clear_claim();
    }

    /// Claimed -> Sent | Errored.
    pub fn finalize(&mut self, outcome: TaskOutcome) {
        self.attempts += 1;
        match outcome {
            TaskOutcome::Sent => self.state = ClaimState::Sent,
            TaskOutcome::Errored(error) => {
                self.state = ClaimState::Errored;
                self.last_error = Some(error);
            }
        }
        self.clear_claim();
    }

    fn clear_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task() -> SendTask {
        SendTask::new(
            CampaignId::generate(),
            Recipient::new("a@example.com"),
            Utc::now() - Duration::minutes(1),
        )
    }

    #[test]
    fn claim_is_exclusive_until_released() {
        let now = Utc::now();
        let mut t = task();
        assert!(t.try_claim("worker-a", now));
        assert!(!t.try_claim("worker-b", now));
        assert!(t.is_claimed_by("worker-a"));
        assert!(!t.is_claimed_by("worker-b"));

        t.release(now + Duration::minutes(2), "busy".to_string());
        assert_eq!(t.state, ClaimState::Unclaimed);
        assert_eq!(t.attempts, 1);
        assert!(!t.is_due(now));
        assert!(t.is_due(now + Duration::minutes(2)));
        assert!(t.try_claim("worker-b", now));
    }

    #[test]
    fn finalize_sent_is_terminal_and_never_due() {
        let now = Utc::now();
        let mut t = task();
        assert!(t.try_claim("w", now));
        t.finalize(TaskOutcome::Sent);
        assert_eq!(t.state, ClaimState::Sent);
        assert_eq!(t.attempts, 1);
        assert!(t.claimed_by.is_none());
        assert!(!t.is_due(now + Duration::days(1)));
        assert!(!t.try_claim("w", now));
    }

    #[test]
    fn stale_release_keeps_attempt_count() {
        let now = Utc::now();
        let mut t = task();
        assert!(t.try_claim("w", now));
        t.release_stale();
        assert_eq!(t.state, ClaimState::Unclaimed);
        assert_eq!(t.attempts, 0);
        assert!(t.is_due(now));
    }

    #[test]
    fn errored_records_reason() {
        let mut t = task();
        assert!(t.try_claim("w", Utc::now()));
        t.finalize(TaskOutcome::Errored("550 mailbox unavailable".to_string()));
        assert_eq!(t.state, ClaimState::Errored);
        assert_eq!(t.last_error.as_deref(), Some("550 mailbox unavailable"));
    }
}
