//! Delivery reports: the backend's per-task verdict on a batch.
//!
//! The worker only needs three answers from a backend: the message left,
//! the message may leave later, or the message will never leave. Everything
//! else (SMTP codes, provider error bodies) is carried as the reason text.

use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// Classification of one delivery attempt.
///
/// - `Delivered`: handed off to the transport.
/// - `Transient`: may succeed later (connection refused, 4xx, timeout).
/// - `Permanent`: retrying is pointless (5xx, malformed address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Delivered,
    Transient(String),
    Permanent(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::Transient(r) | DeliveryOutcome::Permanent(r) => Some(r),
        }
    }
}

/// Outcome for one task of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub task_id: TaskId,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn delivered(task_id: TaskId) -> Self {
        Self {
            task_id,
            outcome: DeliveryOutcome::Delivered,
        }
    }

    pub fn transient(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            outcome: DeliveryOutcome::Transient(reason.into()),
        }
    }

    pub fn permanent(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            outcome: DeliveryOutcome::Permanent(reason.into()),
        }
    }
}
