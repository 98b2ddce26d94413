//! Retry policy: turns a delivery outcome into the next claim transition.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{DeliveryOutcome, TaskOutcome, latest_send_at};

/// What the worker does with a claimed task after the backend answered.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Terminal: finalize as sent or errored.
    Finalize(TaskOutcome),

    /// Give the task back for a later cycle.
    Release {
        next_send_at: DateTime<Utc>,
        error: String,
    },
}

/// Bounded exponential backoff for failed sends.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Dispatch attempts before a task is errored (including the first).
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub base_delay: Duration,

    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 8 attempts, 2 minutes doubling: the mailer's historical schedule.
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(120),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempts` failed attempts
    /// (1-indexed): `base_delay * multiplier^(attempts - 1)`.
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }

    /// Decide the transition for a task that had `prior_attempts` finished
    /// attempts before this one.
    pub fn decide(
        &self,
        prior_attempts: u32,
        outcome: &DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let attempt = prior_attempts.saturating_add(1);
        match outcome {
            DeliveryOutcome::Delivered => RetryDecision::Finalize(TaskOutcome::Sent),
            DeliveryOutcome::Permanent(reason) => {
                RetryDecision::Finalize(TaskOutcome::Errored(reason.clone()))
            }
            DeliveryOutcome::Transient(reason) if attempt >= self.max_attempts => {
                RetryDecision::Finalize(TaskOutcome::Errored(format!(
                    "max send attempts exceeded ({attempt}): {reason}"
                )))
            }
            DeliveryOutcome::Transient(reason) => {
                let delay = chrono::Duration::from_std(self.next_delay(attempt))
                    .unwrap_or(chrono::Duration::MAX);
                let latest = latest_send_at();
                let next_send_at = now
                    .checked_add_signed(delay)
                    .map_or(latest, |t| t.min(latest));
                RetryDecision::Release {
                    next_send_at,
                    error: reason.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Duration::from_secs(120));
        assert_eq!(policy.next_delay(2), Duration::from_secs(240));
        assert_eq!(policy.next_delay(3), Duration::from_secs(480));
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(u32::MAX), Duration::MAX);
        match policy.decide(3, &DeliveryOutcome::Transient("x".into()), now()) {
            RetryDecision::Release { next_send_at, .. } => assert!(next_send_at > now()),
            other => panic!("expected release, got {other:?}"),
        }
    }

    #[test]
    fn release_never_defers_past_year_9999() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(400_000_000_000),
            ..RetryPolicy::default()
        };
        let decision = policy.decide(0, &DeliveryOutcome::Transient("421".into()), now());
        assert_eq!(
            decision,
            RetryDecision::Release {
                next_send_at: Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap(),
                error: "421".into(),
            }
        );
    }

    #[rstest]
    #[case::first_failure(0, true)]
    #[case::second_to_last(1, true)]
    #[case::last_allowed(2, false)]
    fn transient_failures_are_bounded(#[case] prior: u32, #[case] released: bool) {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let decision = policy.decide(prior, &DeliveryOutcome::Transient("421".into()), now());
        assert_eq!(matches!(decision, RetryDecision::Release { .. }), released);
    }

    #[test]
    fn release_defers_by_backoff() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(1, &DeliveryOutcome::Transient("421".into()), now());
        assert_eq!(
            decision,
            RetryDecision::Release {
                next_send_at: now() + chrono::Duration::seconds(240),
                error: "421".into(),
            }
        );
    }

    #[test]
    fn permanent_and_delivered_finalize_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, &DeliveryOutcome::Delivered, now()),
            RetryDecision::Finalize(TaskOutcome::Sent)
        );
        assert_eq!(
            policy.decide(0, &DeliveryOutcome::Permanent("550".into()), now()),
            RetryDecision::Finalize(TaskOutcome::Errored("550".into()))
        );
    }
}
