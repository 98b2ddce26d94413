//! courier - campaign mail dispatch worker.
//!
//! Usage:
//!   courier run                         # poll and dispatch until Ctrl-C
//!   courier run --workers 4             # several workers on one database
//!   courier tick                        # one cycle, prints the report as JSON
//!   courier seed --name Q3 --generate 25 --spread-minutes 30
//!   courier status                      # campaigns and their task counts

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use courier_core::app::launch;
use courier_core::domain::{Campaign, CampaignProgress, Recipient};
use courier_core::impls::{LogSender, QueuedBackend, SqliteTaskStore};
use courier_core::ports::{CampaignWriter, DeliveryBackend, SystemClock, TaskStore, UlidGenerator};
use courier_core::{DispatchWorker, WorkerConfig, WorkerGroup};

const DEFAULT_DB: &str = "courier.db";

#[derive(Parser)]
#[command(name = "courier", version, about = "Campaign mail dispatch worker")]
struct Cli {
    /// SQLite database (overrides `database` in the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML config file with a `[worker]` table
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run dispatch workers until interrupted
    Run {
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },

    /// Run a single dispatch cycle and print its report
    Tick,

    /// Create a queued campaign with recipients
    Seed {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "admin")]
        owner: String,

        /// Recipient address (repeatable)
        #[arg(long = "to")]
        to: Vec<String>,

        /// Add N generated recipients (user<i>@example.com)
        #[arg(long, default_value_t = 0)]
        generate: usize,

        /// Spread send times over this many minutes from now
        #[arg(long)]
        spread_minutes: Option<i64>,

        /// Dispatch the campaign's due tasks right away
        #[arg(long)]
        now: bool,
    },

    /// List campaigns with their task counts
    Status,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    database: Option<PathBuf>,
    worker: WorkerConfig,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
        config.worker.validate()?;
        Ok(config)
    }
}

#[derive(Serialize)]
struct CampaignLine {
    #[serde(flatten)]
    campaign: Campaign,
    progress: CampaignProgress,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "courier=debug,courier_core=debug"
    } else {
        "courier=info,courier_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = FileConfig::load(cli.config.as_deref())?;
    let db_path = cli
        .db
        .or(config.database)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));
    let store = Arc::new(
        SqliteTaskStore::open(&db_path).with_context(|| format!("open {}", db_path.display()))?,
    );

    match cli.command {
        Command::Run { workers } => run(store, &config.worker, workers).await,
        Command::Tick => tick(store, &config.worker).await,
        Command::Seed {
            name,
            owner,
            to,
            generate,
            spread_minutes,
            now,
        } => {
            let mut recipients: Vec<Recipient> = to.into_iter().map(Recipient::new).collect();
            recipients.extend(
                (0..generate).map(|i| {
                    Recipient::new(format!("user{i}@example.com")).with_name("User", i.to_string())
                }),
            );
            anyhow::ensure!(!recipients.is_empty(), "no recipients: use --to or --generate");
            seed(store, &config.worker, name, owner, recipients, spread_minutes, now).await
        }
        Command::Status => status(store.as_ref()).await,
    }
}

/// Start the mailer in the background. It stops when `shutdown` flips.
fn start_mailer(shutdown: watch::Receiver<bool>) -> (Arc<QueuedBackend<LogSender>>, tokio::task::JoinHandle<()>) {
    let backend = Arc::new(QueuedBackend::new(LogSender));
    let mailer = tokio::spawn({
        let backend = Arc::clone(&backend);
        async move { backend.start(shutdown).await }
    });
    (backend, mailer)
}

async fn run(store: Arc<SqliteTaskStore>, config: &WorkerConfig, workers: usize) -> Result<()> {
    anyhow::ensure!(workers > 0, "--workers must be at least 1");
    let (mailer_tx, mailer_rx) = watch::channel(false);
    let (backend, mailer) = start_mailer(mailer_rx);

    let group = WorkerGroup::spawn(workers, store, backend, config);
    tracing::info!(workers = ?group.worker_ids(), "press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("wait for Ctrl-C")?;
    tracing::info!("shutdown requested, finishing cycles in flight");
    group.shutdown_and_join().await;

    let _ = mailer_tx.send(true);
    mailer.await.context("mailer task")?;
    Ok(())
}

async fn tick(store: Arc<SqliteTaskStore>, config: &WorkerConfig) -> Result<()> {
    let (mailer_tx, mailer_rx) = watch::channel(false);
    let (backend, mailer) = start_mailer(mailer_rx);

    let worker = DispatchWorker::new(store, backend, config);
    let report = worker.process_due_tasks(Utc::now()).await;

    let _ = mailer_tx.send(true);
    mailer.await.context("mailer task")?;

    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

async fn seed(
    store: Arc<SqliteTaskStore>,
    config: &WorkerConfig,
    name: String,
    owner: String,
    recipients: Vec<Recipient>,
    spread_minutes: Option<i64>,
    dispatch_now: bool,
) -> Result<()> {
    let launch_at = Utc::now();
    let mut campaign = Campaign::new(name, owner, launch_at);
    if let Some(minutes) = spread_minutes.filter(|m| *m > 0) {
        campaign = campaign.with_send_by(launch_at + Duration::minutes(minutes));
    }

    let ids = UlidGenerator::new(SystemClock);
    let (campaign, tasks) = launch(store.as_ref(), campaign, recipients, &ids).await?;
    println!("{} queued with {} tasks", campaign.id, tasks.len());

    if dispatch_now {
        let (mailer_tx, mailer_rx) = watch::channel(false);
        let (backend, mailer) = start_mailer(mailer_rx);
        let worker = DispatchWorker::new(store.clone(), backend, config);
        let report = worker.launch_campaign(campaign.id, Utc::now()).await;

        let _ = mailer_tx.send(true);
        mailer.await.context("mailer task")?;
        println!("{}", serde_json::to_string_pretty(&report?)?);
    }
    Ok(())
}

async fn status(store: &SqliteTaskStore) -> Result<()> {
    let campaigns = store.list_campaigns().await?;
    if campaigns.is_empty() {
        println!("no campaigns");
        return Ok(());
    }
    for campaign in campaigns {
        let progress = store.campaign_progress(campaign.id).await?;
        println!("{}", serde_json::to_string(&CampaignLine { campaign, progress })?);
    }
    Ok(())
}
