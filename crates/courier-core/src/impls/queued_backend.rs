//! QueuedBackend - a mailer task fed through a channel.
//!
//! `accept_batch` enqueues the batch and waits for the mailer's reply;
//! `start` is the mailer loop that drains the queue and sends each message
//! through a `MessageSender`. One mailer per backend, so messages leave one
//! at a time no matter how many batches the worker has in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot, watch};

use crate::domain::{DeliveryError, DeliveryReport, DispatchBatch};
use crate::ports::{DeliveryBackend, MessageSender};

const DEFAULT_CAPACITY: usize = 64;
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(300);

struct MailJob {
    batch: DispatchBatch,
    reply: oneshot::Sender<Vec<DeliveryReport>>,
}

pub struct QueuedBackend<S> {
    sender: Arc<S>,
    jobs: mpsc::Sender<MailJob>,
    /// Taken by the first `start`.
    inbox: Mutex<Option<mpsc::Receiver<MailJob>>>,
    reply_timeout: Duration,
}

impl<S: MessageSender + 'static> QueuedBackend<S> {
    pub fn new(sender: S) -> Self {
        Self::with_capacity(sender, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(sender: S, capacity: usize) -> Self {
        let (jobs, inbox) = mpsc::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
            jobs,
            inbox: Mutex::new(Some(inbox)),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// How long `accept_batch` waits for the mailer before giving up with
    /// `DeliveryError::Unavailable`.
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    async fn send_batch(&self, batch: &DispatchBatch) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(batch.len());
        for task in batch.tasks() {
            let outcome = self.sender.send(task).await;
            if let Some(reason) = outcome.reason() {
                tracing::warn!(task_id = %task.id, email = %task.recipient.email, %reason, "send failed");
            }
            reports.push(DeliveryReport {
                task_id: task.id,
                outcome,
            });
        }
        reports
    }
}

#[async_trait]
impl<S: MessageSender + 'static> DeliveryBackend for QueuedBackend<S> {
    async fn start(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut inbox) = self.inbox.lock().await.take() else {
            tracing::warn!("mailer already started");
            return;
        };
        tracing::info!("mailer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                job = inbox.recv() => {
                    let Some(job) = job else { break };
                    let campaign_id = job.batch.campaign_id();
                    tracing::debug!(%campaign_id, size = job.batch.len(), "mailer picked up batch");
                    let reports = self.send_batch(&job.batch).await;
                    if job.reply.send(reports).is_err() {
                        tracing::warn!(%campaign_id, "dispatcher stopped waiting for the batch");
                    }
                }
            }
        }

        // Pending jobs are dropped with their reply channels; their callers
        // see `Closed` and release the tasks.
        inbox.close();
        tracing::info!("mailer stopped");
    }

    async fn accept_batch(&self, batch: &DispatchBatch) -> Result<Vec<DeliveryReport>, DeliveryError> {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(MailJob {
                batch: batch.clone(),
                reply,
            })
            .await
            .map_err(|_| DeliveryError::Closed)?;

        match tokio::time::timeout(self.reply_timeout, answer).await {
            Ok(Ok(reports)) => Ok(reports),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::Unavailable(format!(
                "mailer did not answer within {}s",
                self.reply_timeout.as_secs()
            ))),
        }
    }
}
