//! LogSender - message sender that logs instead of talking SMTP.

use async_trait::async_trait;

use crate::domain::{DeliveryOutcome, SendTask};
use crate::ports::MessageSender;

/// Logs each message and reports it delivered. Addresses that could never
/// be delivered (no `@`, empty local part or domain) are rejected
/// permanently, like a relay would.
#[derive(Debug, Clone, Default)]
pub struct LogSender;

#[async_trait]
impl MessageSender for LogSender {
    async fn send(&self, task: &SendTask) -> DeliveryOutcome {
        let email = task.recipient.email.trim();
        let valid = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
        if !valid {
            return DeliveryOutcome::Permanent(format!("invalid recipient address {email:?}"));
        }

        tracing::info!(
            task_id = %task.id,
            campaign_id = %task.campaign_id,
            to = %email,
            first_name = %task.recipient.first_name,
            last_name = %task.recipient.last_name,
            "message sent"
        );
        DeliveryOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CampaignId, Recipient};
    use chrono::Utc;
    use rstest::rstest;

    #[rstest]
    #[case("jane@example.com", true)]
    #[case("jane@", false)]
    #[case("@example.com", false)]
    #[case("not-an-address", false)]
    #[tokio::test]
    async fn rejects_undeliverable_addresses(#[case] email: &str, #[case] delivered: bool) {
        let task = SendTask::new(CampaignId::generate(), Recipient::new(email), Utc::now());
        let outcome = LogSender.send(&task).await;
        assert_eq!(outcome.is_delivered(), delivered);
    }
}
