//! DeliveryBackend port - the mailer that transports dispatch batches.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{DeliveryError, DeliveryOutcome, DeliveryReport, DispatchBatch, SendTask};

/// Accepts campaign-homogeneous batches and reports a verdict per task.
///
/// # Lifecycle
/// - `start` is called once at process init and may run until `shutdown`
///   flips to `true`. Backends without background work keep the default.
/// - `accept_batch` may be called concurrently for different batches; any
///   serialization the transport needs is the backend's business.
///
/// A task missing from the returned reports counts as a transient failure.
///
/// # Thread Safety
/// - `Send + Sync`: every worker of a group hands batches to one backend.
///
/// # Implementations
/// - **RecordingBackend**: records batches, scripted outcomes (tests)
/// - **QueuedBackend**: channel in front of a `MessageSender`
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    async fn start(&self, _shutdown: watch::Receiver<bool>) {}

    async fn accept_batch(&self, batch: &DispatchBatch) -> Result<Vec<DeliveryReport>, DeliveryError>;
}

/// Sends one message. The queued backend drives a sender per task.
///
/// This is the seam where an SMTP client would plug in.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, task: &SendTask) -> DeliveryOutcome;
}
