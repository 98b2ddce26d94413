//! DispatchWorker - the periodic claim, batch, dispatch, settle cycle.
//!
//! # Flow (one cycle)
//! 1. Hand stale claims back (when a claim timeout is configured)
//! 2. `TaskStore::query_due_unclaimed(at)`
//! 3. `TaskStore::claim()` per task; tasks another worker won are skipped
//! 4. Partition the claimed tasks into per-campaign batches
//! 5. Per batch, concurrently: mark the campaign in progress, hand the batch
//!    to the `DeliveryBackend`, finalize or release every task
//! 6. Per touched campaign: settle its status if nothing is left to send
//!
//! Only a failed due query aborts a cycle. Everything after it is per task
//! or per campaign: the failure is logged and counted, the rest carries on,
//! and the next cycle picks up whatever is still unclaimed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::batching;
use super::lifecycle;
use super::retry::{RetryDecision, RetryPolicy};
use crate::config::WorkerConfig;
use crate::domain::{
    CampaignId, DeliveryOutcome, DispatchBatch, DispatchError, SendTask, TaskId, TaskOutcome,
};
use crate::observability::CycleReport;
use crate::ports::{Clock, DeliveryBackend, SystemClock, TaskStore};

pub struct DispatchWorker {
    worker_id: String,
    store: Arc<dyn TaskStore>,
    backend: Arc<dyn DeliveryBackend>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    poll_interval: Duration,
    batch_concurrency: usize,
    claim_timeout: Option<Duration>,
}

impl DispatchWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        backend: Arc<dyn DeliveryBackend>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            worker_id: config.worker_id(),
            store,
            backend,
            clock: Arc::new(SystemClock),
            retry: config.retry_policy(),
            poll_interval: config.poll_interval(),
            batch_concurrency: config.batch_concurrency.max(1),
            claim_timeout: config.claim_timeout(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Sub-second intervals for tests; config files only speak seconds.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run a cycle every poll interval until `shutdown` flips to `true` (or
    /// its sender goes away). The first cycle runs immediately.
    ///
    /// Shutdown is observed between cycles: a cycle in progress finishes, so
    /// no claim is left dangling by a clean stop.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(&mut shutdown).await })
    }

    async fn run(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            worker_id = %self.worker_id,
            interval_ms = self.poll_interval.as_millis() as u64,
            "dispatch worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let at = self.clock.now();
            let span = tracing::info_span!("cycle", worker_id = %self.worker_id, %at);
            match self.process_due_tasks(at).instrument(span).await {
                Ok(report) if report.is_idle() => {
                    tracing::trace!(worker_id = %self.worker_id, "nothing due");
                }
                Ok(report) => {
                    tracing::info!(
                        worker_id = %self.worker_id,
                        due = report.due,
                        claimed = report.claimed,
                        conflicts = report.conflicts,
                        batches = report.batches,
                        sent = report.sent,
                        retried = report.retried,
                        errored = report.errored,
                        "cycle finished"
                    );
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "cycle aborted");
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "dispatch worker stopped");
    }

    /// One dispatch cycle over everything due at `at`.
    pub async fn process_due_tasks(&self, at: DateTime<Utc>) -> Result<CycleReport, DispatchError> {
        let stale_released = self.recover_stale_claims(at).await;
        let due = self.store.query_due_unclaimed(at).await?;

        let mut report = self.dispatch(due, at).await;
        report.stale_released = stale_released;
        Ok(report)
    }

    /// Dispatch the due tasks of one campaign right away, without waiting
    /// for the next tick. Claims work exactly as in a regular cycle, so a
    /// concurrent cycle and a launch never send the same task twice.
    pub async fn launch_campaign(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<CycleReport, DispatchError> {
        let due = self
            .store
            .query_campaign_due_unclaimed(campaign_id, at)
            .await?;
        tracing::info!(%campaign_id, due = due.len(), "launching campaign");
        Ok(self.dispatch(due, at).await)
    }

    async fn dispatch(&self, due: Vec<SendTask>, at: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        if due.is_empty() {
            return report;
        }

        let claimed = self.claim_all(due, at, &mut report).await;
        let batches = batching::partition(claimed);
        report.batches = batches.len();
        let campaigns: Vec<CampaignId> = batches.iter().map(DispatchBatch::campaign_id).collect();

        let batch_reports: Vec<CycleReport> = futures::stream::iter(batches)
            .map(|batch| self.dispatch_batch(batch, at))
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;
        for batch_report in &batch_reports {
            report.merge(batch_report);
        }

        for campaign_id in campaigns {
            match lifecycle::refresh_status(self.store.as_ref(), campaign_id, at).await {
                Ok(Some(_)) => report.campaigns_settled += 1,
                Ok(None) => {}
                Err(e) => {
                    report.store_errors += 1;
                    tracing::error!(%campaign_id, error = %e, "could not refresh campaign status");
                }
            }
        }

        report
    }

    async fn claim_all(
        &self,
        due: Vec<SendTask>,
        at: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Vec<SendTask> {
        let mut claimed = Vec::with_capacity(due.len());
        for mut task in due {
            match self.store.claim(task.id, &self.worker_id, at).await {
                Ok(true) => {
                    task.try_claim(&self.worker_id, at);
                    claimed.push(task);
                }
                Ok(false) => {
                    report.conflicts += 1;
                    tracing::debug!(task_id = %task.id, "claimed by another worker");
                }
                Err(e) => {
                    report.claim_errors += 1;
                    tracing::warn!(task_id = %task.id, error = %e, "claim failed; skipping task");
                }
            }
        }
        report.claimed = claimed.len();
        claimed
    }

    async fn dispatch_batch(&self, batch: DispatchBatch, at: DateTime<Utc>) -> CycleReport {
        let campaign_id = batch.campaign_id();
        let span = tracing::info_span!("batch", %campaign_id, size = batch.len());

        async move {
            let mut report = CycleReport::default();
            match lifecycle::mark_in_progress(self.store.as_ref(), campaign_id, at).await {
                Ok(Some(_)) => report.campaigns_started += 1,
                Ok(None) => {}
                Err(e) => {
                    report.store_errors += 1;
                    tracing::error!(error = %e, "could not mark campaign in progress");
                }
            }

            tracing::debug!("handing batch to the delivery backend");
            let mut outcomes = self.deliver(&batch).await;
            for task in batch.into_tasks() {
                let outcome = outcomes.remove(&task.id).unwrap_or_else(|| {
                    DeliveryOutcome::Transient("no delivery report for task".to_string())
                });
                self.settle(&task, &outcome, at, &mut report).await;
            }
            if !outcomes.is_empty() {
                tracing::warn!(extra = outcomes.len(), "ignored reports for tasks outside the batch");
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn deliver(&self, batch: &DispatchBatch) -> HashMap<TaskId, DeliveryOutcome> {
        match self.backend.accept_batch(batch).await {
            Ok(reports) => reports
                .into_iter()
                .map(|r| (r.task_id, r.outcome))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "delivery backend refused the batch");
                let outcome = if e.is_permanent() {
                    DeliveryOutcome::Permanent(e.to_string())
                } else {
                    DeliveryOutcome::Transient(e.to_string())
                };
                batch.task_ids().map(|id| (id, outcome.clone())).collect()
            }
        }
    }

    async fn settle(
        &self,
        task: &SendTask,
        outcome: &DeliveryOutcome,
        at: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let decision = self.retry.decide(task.attempts, outcome, at);
        let written = match &decision {
            RetryDecision::Finalize(result) => {
                self.store
                    .finalize(task.id, &self.worker_id, result.clone())
                    .await
            }
            RetryDecision::Release {
                next_send_at,
                error,
            } => {
                self.store
                    .release(task.id, &self.worker_id, *next_send_at, error)
                    .await
            }
        };
        if let Err(e) = written {
            report.store_errors += 1;
            tracing::error!(task_id = %task.id, error = %e, "could not record delivery outcome");
            return;
        }

        let attempt = task.attempts + 1;
        match decision {
            RetryDecision::Finalize(TaskOutcome::Sent) => report.sent += 1,
            RetryDecision::Finalize(TaskOutcome::Errored(reason)) => {
                report.errored += 1;
                tracing::warn!(
                    task_id = %task.id,
                    email = %task.recipient.email,
                    attempt,
                    %reason,
                    "task errored"
                );
            }
            RetryDecision::Release {
                next_send_at,
                error,
            } => {
                report.retried += 1;
                tracing::info!(
                    task_id = %task.id,
                    attempt,
                    %next_send_at,
                    %error,
                    "task released for retry"
                );
            }
        }
    }

    async fn recover_stale_claims(&self, at: DateTime<Utc>) -> usize {
        let Some(timeout) = self.claim_timeout else {
            return 0;
        };
        let Some(cutoff) = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| at.checked_sub_signed(timeout))
        else {
            return 0;
        };

        match self.store.release_stale_claims(cutoff).await {
            Ok(0) => 0,
            Ok(released) => {
                tracing::warn!(released, %cutoff, "released stale claims");
                released
            }
            Err(e) => {
                tracing::warn!(error = %e, "stale claim recovery failed");
                0
            }
        }
    }
}
