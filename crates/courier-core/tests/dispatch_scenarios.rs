use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::watch;

use courier_core::app::launch;
use courier_core::domain::{
    Campaign, CampaignStatus, ClaimState, DeliveryOutcome, Recipient, SendTask,
};
use courier_core::impls::{InMemoryTaskStore, LogSender, QueuedBackend, RecordingBackend, SqliteTaskStore};
use courier_core::ports::{
    CampaignWriter, DeliveryBackend, FixedClock, SystemClock, TaskStore, UlidGenerator,
};
use courier_core::{DispatchWorker, WorkerConfig};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 8, 30, 0).unwrap()
}

fn worker(store: Arc<dyn TaskStore>, backend: Arc<dyn DeliveryBackend>, id: &str) -> DispatchWorker {
    DispatchWorker::new(store, backend, &WorkerConfig::default())
        .with_clock(Arc::new(FixedClock::new(t0())))
        .with_worker_id(id)
}

async fn seed_campaign(
    writer: &dyn CampaignWriter,
    name: &str,
    recipients: usize,
    send_at: DateTime<Utc>,
) -> (Campaign, Vec<SendTask>) {
    let campaign = Campaign::new(name, "admin", send_at);
    let tasks: Vec<SendTask> = (0..recipients)
        .map(|i| SendTask::new(campaign.id, Recipient::new(format!("{name}-{i}@corp.test")), send_at))
        .collect();
    writer.insert_campaign(&campaign).await.unwrap();
    writer.insert_tasks(&tasks).await.unwrap();
    (campaign, tasks)
}

#[tokio::test]
async fn ten_campaigns_go_out_as_ten_homogeneous_batches() {
    let store = InMemoryTaskStore::new();
    let backend = RecordingBackend::new();
    let mut campaigns = Vec::new();
    for c in 0..10 {
        let (campaign, _) = seed_campaign(&store, &format!("c{c}"), 5, t0()).await;
        campaigns.push(campaign);
    }

    let report = worker(Arc::new(store.clone()), Arc::new(backend.clone()), "w")
        .process_due_tasks(t0())
        .await
        .unwrap();

    assert_eq!(report.batches, 10);
    assert_eq!(report.sent, 50);
    let batches = backend.batches();
    assert_eq!(batches.len(), 10);
    for batch in &batches {
        assert_eq!(batch.len(), 5);
        assert!(batch.tasks().iter().all(|t| t.campaign_id == batch.campaign_id()));
    }
    let batch_campaigns: HashSet<_> = batches.iter().map(|b| b.campaign_id()).collect();
    assert_eq!(batch_campaigns.len(), 10);

    for campaign in &campaigns {
        let stored = store.get_campaign(campaign.id).await.unwrap();
        assert_eq!(stored.status, CampaignStatus::EmailsSent);
        assert!(stored.completed_at.is_some());
    }
}

#[tokio::test]
async fn a_claimed_task_cannot_be_claimed_again() {
    let store = InMemoryTaskStore::new();
    let (_, tasks) = seed_campaign(&store, "claims", 1, t0()).await;

    assert!(store.claim(tasks[0].id, "worker-a", t0()).await.unwrap());
    assert!(!store.claim(tasks[0].id, "worker-b", t0()).await.unwrap());

    let backend = RecordingBackend::new();
    let report = worker(Arc::new(store.clone()), Arc::new(backend.clone()), "worker-b")
        .process_due_tasks(t0())
        .await
        .unwrap();
    assert_eq!(report.due, 0);
    assert!(backend.batches().is_empty());
    assert!(store.get_task(tasks[0].id).await.unwrap().is_claimed_by("worker-a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_deliver_twice() {
    let store = InMemoryTaskStore::new();
    let backend = RecordingBackend::new();
    for c in 0..4 {
        seed_campaign(&store, &format!("race{c}"), 25, t0()).await;
    }

    let a = worker(Arc::new(store.clone()), Arc::new(backend.clone()), "a");
    let b = worker(Arc::new(store.clone()), Arc::new(backend.clone()), "b");
    let (ra, rb) = tokio::join!(a.process_due_tasks(t0()), b.process_due_tasks(t0()));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.sent + rb.sent, 100);
    let dispatched = backend.dispatched();
    let unique: HashSet<_> = dispatched.iter().collect();
    assert_eq!(dispatched.len(), 100);
    assert_eq!(unique.len(), 100);
    for batch in backend.batches() {
        assert!(batch.tasks().iter().all(|t| t.campaign_id == batch.campaign_id()));
    }
}

#[tokio::test]
async fn sent_tasks_are_not_picked_up_by_later_cycles() {
    let store = InMemoryTaskStore::new();
    let backend = RecordingBackend::new();
    seed_campaign(&store, "once", 3, t0()).await;
    let w = worker(Arc::new(store.clone()), Arc::new(backend.clone()), "w");

    w.process_due_tasks(t0()).await.unwrap();
    for hours in 1..4 {
        let report = w.process_due_tasks(t0() + Duration::hours(hours)).await.unwrap();
        assert!(report.is_idle());
    }
    assert_eq!(backend.dispatched().len(), 3);
}

#[tokio::test]
async fn paced_campaign_settles_after_its_last_send() {
    let store = InMemoryTaskStore::new();
    let backend = RecordingBackend::new();
    let draft = Campaign::new("paced", "admin", t0()).with_send_by(t0() + Duration::minutes(30));
    let recipients = (0..3).map(|i| Recipient::new(format!("p{i}@corp.test"))).collect();
    let (campaign, tasks) = launch(&store, draft, recipients, &UlidGenerator::new(SystemClock))
        .await
        .unwrap();
    assert_eq!(tasks[1].send_at, t0() + Duration::minutes(10));

    let w = worker(Arc::new(store.clone()), Arc::new(backend.clone()), "w");

    let report = w.process_due_tasks(t0()).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(store.get_campaign(campaign.id).await.unwrap().status, CampaignStatus::InProgress);

    w.process_due_tasks(t0() + Duration::minutes(10)).await.unwrap();
    assert_eq!(store.get_campaign(campaign.id).await.unwrap().status, CampaignStatus::InProgress);

    let report = w.process_due_tasks(t0() + Duration::minutes(20)).await.unwrap();
    assert_eq!(report.campaigns_settled, 1);
    assert_eq!(store.get_campaign(campaign.id).await.unwrap().status, CampaignStatus::EmailsSent);
}

#[tokio::test]
async fn sqlite_store_runs_a_full_cycle() {
    let store = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
    let backend = RecordingBackend::new();
    let (campaign, tasks) = seed_campaign(store.as_ref(), "sqlite", 4, t0()).await;

    let report = worker(store.clone(), Arc::new(backend.clone()), "w")
        .process_due_tasks(t0())
        .await
        .unwrap();

    assert_eq!(report.sent, 4);
    for task in &tasks {
        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ClaimState::Sent);
        assert_eq!(stored.attempts, 1);
    }
    assert_eq!(store.get_campaign(campaign.id).await.unwrap().status, CampaignStatus::EmailsSent);
}

#[tokio::test]
async fn huge_backoff_parks_one_task_without_stalling_the_store() {
    let store = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
    let backend = RecordingBackend::new();
    let (_, stuck) = seed_campaign(store.as_ref(), "stuck", 1, t0()).await;
    backend.script("stuck-0@corp.test", DeliveryOutcome::Transient("421 busy".into()));

    let config = WorkerConfig {
        backoff_base_secs: 400_000_000_000,
        ..WorkerConfig::default()
    };
    assert!(config.validate().is_ok());
    let w = DispatchWorker::new(store.clone(), Arc::new(backend.clone()), &config)
        .with_clock(Arc::new(FixedClock::new(t0())))
        .with_worker_id("w");

    let first = w.process_due_tasks(t0()).await.unwrap();
    assert_eq!(first.retried, 1);
    assert_eq!(first.store_errors, 0);
    let parked = store.get_task(stuck[0].id).await.unwrap().unwrap();
    assert_eq!(parked.send_at, Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap());

    let later = t0() + Duration::hours(1);
    let (fresh, _) = seed_campaign(store.as_ref(), "fresh", 2, later).await;
    let second = w.process_due_tasks(later).await.unwrap();
    assert_eq!(second.batches, 1);
    assert_eq!(second.sent, 2);
    assert_eq!(store.get_campaign(fresh.id).await.unwrap().status, CampaignStatus::EmailsSent);
}

#[tokio::test]
async fn queued_mailer_rejects_bad_addresses_and_sends_the_rest() {
    let store = InMemoryTaskStore::new();
    let campaign = Campaign::new("mailer", "admin", t0());
    let tasks = vec![
        SendTask::new(campaign.id, Recipient::new("ok@corp.test"), t0()),
        SendTask::new(campaign.id, Recipient::new("no-at-sign"), t0()),
    ];
    store.insert_campaign(&campaign).await.unwrap();
    store.insert_tasks(&tasks).await.unwrap();

    let backend = Arc::new(QueuedBackend::new(LogSender));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mailer = tokio::spawn({
        let backend = Arc::clone(&backend);
        async move { backend.start(shutdown_rx).await }
    });

    let report = worker(Arc::new(store.clone()), backend, "w")
        .launch_campaign(campaign.id, t0())
        .await
        .unwrap();
    shutdown_tx.send(true).unwrap();
    mailer.await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.errored, 1);
    assert_eq!(store.get_task(tasks[1].id).await.unwrap().state, ClaimState::Errored);
    assert_eq!(store.get_campaign(campaign.id).await.unwrap().status, CampaignStatus::EmailsSent);
}
