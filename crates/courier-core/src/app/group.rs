use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::worker_loop::DispatchWorker;
use crate::config::WorkerConfig;
use crate::ports::{Clock, DeliveryBackend, TaskStore};

/// Worker group handle.
/// - all workers share one store and one backend; claims keep them apart
/// - dropping the group drops `shutdown_tx`, which also stops the workers
/// - `shutdown_and_join()` waits for the cycles in flight to finish
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    worker_ids: Vec<String>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers named `<base>-<i>`, where `base` is the configured
    /// worker id.
    pub fn spawn(
        n: usize,
        store: Arc<dyn TaskStore>,
        backend: Arc<dyn DeliveryBackend>,
        config: &WorkerConfig,
    ) -> Self {
        Self::spawn_with_clock(n, store, backend, config, None)
    }

    pub fn spawn_with_clock(
        n: usize,
        store: Arc<dyn TaskStore>,
        backend: Arc<dyn DeliveryBackend>,
        config: &WorkerConfig,
        clock: Option<Arc<dyn Clock>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let base = config.worker_id();

        let mut worker_ids = Vec::with_capacity(n);
        let mut joins = Vec::with_capacity(n);
        for i in 0..n {
            let mut worker = DispatchWorker::new(Arc::clone(&store), Arc::clone(&backend), config)
                .with_worker_id(format!("{base}-{i}"));
            if let Some(clock) = &clock {
                worker = worker.with_clock(Arc::clone(clock));
            }
            worker_ids.push(worker.worker_id().to_string());
            joins.push(Arc::new(worker).start(shutdown_rx.clone()));
        }

        tracing::info!(workers = n, %base, "worker group started");
        Self {
            shutdown_tx,
            worker_ids,
            joins,
        }
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Ask every worker to stop after its current cycle.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "dispatch worker panicked");
            }
        }
        tracing::info!("worker group stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Campaign, ClaimState, Recipient, SendTask};
    use crate::impls::{InMemoryTaskStore, RecordingBackend};
    use crate::ports::CampaignWriter;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_share_the_load_without_duplicates() {
        let store = InMemoryTaskStore::new();
        let backend = RecordingBackend::new();
        let now = Utc::now();
        let campaign = Campaign::new("Shared load", "admin", now);
        let tasks: Vec<SendTask> = (0..50)
            .map(|i| SendTask::new(campaign.id, Recipient::new(format!("u{i}@x.io")), now))
            .collect();
        store.insert_campaign(&campaign).await.unwrap();
        store.insert_tasks(&tasks).await.unwrap();

        let config = WorkerConfig {
            worker_id: Some("mx".into()),
            poll_interval_secs: 1,
            ..WorkerConfig::default()
        };
        let group = WorkerGroup::spawn(4, Arc::new(store.clone()), Arc::new(backend.clone()), &config);
        assert_eq!(group.worker_ids(), ["mx-0", "mx-1", "mx-2", "mx-3"]);

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let settled = store
                    .tasks_of(campaign.id)
                    .await
                    .iter()
                    .all(|t| t.state == ClaimState::Sent);
                if settled {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        group.shutdown_and_join().await;

        let dispatched = backend.dispatched();
        let unique: HashSet<_> = dispatched.iter().collect();
        assert_eq!(dispatched.len(), 50);
        assert_eq!(unique.len(), 50);
    }
}
