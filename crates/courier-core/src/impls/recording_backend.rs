//! RecordingBackend - delivery backend that keeps every batch it was handed.
//!
//! Used by tests and local trial runs. Outcomes default to
//! `Delivered` and can be scripted per recipient address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::{DeliveryError, DeliveryOutcome, DeliveryReport, DispatchBatch, TaskId};
use crate::ports::DeliveryBackend;

#[derive(Debug, Clone)]
enum Scripted {
    Outcome(DeliveryOutcome),
    /// Leave the task out of the reports.
    Silent,
}

#[derive(Default)]
struct Recorded {
    batches: Vec<DispatchBatch>,
    script: HashMap<String, Scripted>,
    unavailable: Option<String>,
}

/// Delivery backend that records batches instead of sending them.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer `outcome` for every task addressed to `email`.
    pub fn script(&self, email: impl Into<String>, outcome: DeliveryOutcome) {
        self.lock().script.insert(email.into(), Scripted::Outcome(outcome));
    }

    /// Omit tasks addressed to `email` from the reports.
    pub fn stay_silent_for(&self, email: impl Into<String>) {
        self.lock().script.insert(email.into(), Scripted::Silent);
    }

    /// Refuse whole batches with `DeliveryError::Unavailable` until cleared
    /// with `None`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        self.lock().unavailable = reason;
    }

    pub fn batches(&self) -> Vec<DispatchBatch> {
        self.lock().batches.clone()
    }

    /// Every task id handed over, in arrival order. Repeats mean a task was
    /// dispatched more than once.
    pub fn dispatched(&self) -> Vec<TaskId> {
        self.lock()
            .batches
            .iter()
            .flat_map(|b| b.task_ids().collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl DeliveryBackend for RecordingBackend {
    async fn accept_batch(&self, batch: &DispatchBatch) -> Result<Vec<DeliveryReport>, DeliveryError> {
        let mut recorded = self.lock();
        if let Some(reason) = &recorded.unavailable {
            return Err(DeliveryError::Unavailable(reason.clone()));
        }
        recorded.batches.push(batch.clone());

        let reports = batch
            .tasks()
            .iter()
            .filter_map(|task| match recorded.script.get(&task.recipient.email) {
                None => Some(DeliveryReport::delivered(task.id)),
                Some(Scripted::Outcome(outcome)) => Some(DeliveryReport {
                    task_id: task.id,
                    outcome: outcome.clone(),
                }),
                Some(Scripted::Silent) => None,
            })
            .collect();
        Ok(reports)
    }
}
