//! SQLite task store.
//!
//! The durable store shared by worker processes. Claims are one conditional
//! `UPDATE ... WHERE state = 'unclaimed'`; the row count tells the caller
//! whether it won. Several processes may open the same file (WAL mode plus a
//! busy timeout serializes their writes).
//!
//! rusqlite is blocking, so every call hops onto `spawn_blocking`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::domain::{
    Campaign, CampaignId, CampaignProgress, CampaignStatus, ClaimState, Recipient, SendTask,
    StoreError, TaskId, TaskOutcome, latest_send_at,
};
use crate::ports::{CampaignWriter, TaskStore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS campaigns (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        owner TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        launch_at TEXT NOT NULL,
        send_by TEXT,
        completed_at TEXT
    );

    CREATE TABLE IF NOT EXISTS send_tasks (
        id TEXT PRIMARY KEY,
        campaign_id TEXT NOT NULL REFERENCES campaigns(id),
        email TEXT NOT NULL,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        position TEXT NOT NULL DEFAULT '',
        send_at TEXT NOT NULL,              -- RFC 3339, fixed width, compares as text
        state TEXT NOT NULL DEFAULT 'unclaimed',
        claimed_by TEXT,
        claimed_at TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_send_tasks_due ON send_tasks(state, send_at);
    CREATE INDEX IF NOT EXISTS idx_send_tasks_campaign ON send_tasks(campaign_id, state);
";

const TASK_COLUMNS: &str = "id, campaign_id, email, first_name, last_name, position, \
     send_at, state, claimed_by, claimed_at, attempts, last_error";

const CAMPAIGN_COLUMNS: &str =
    "id, name, owner, status, created_at, launch_at, send_by, completed_at";

/// Task store backed by one SQLite connection.
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))?;
            f(&mut conn)
        })
        .await?
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<SendTask>, StoreError> {
        self.call(move |conn| {
            let sql = format!("SELECT {TASK_COLUMNS} FROM send_tasks WHERE id = ?1");
            Ok(conn
                .query_row(&sql, params![task_id.to_key()], task_from_row)
                .optional()?)
        })
        .await
    }

    async fn due(
        &self,
        at: DateTime<Utc>,
        campaign_id: Option<CampaignId>,
    ) -> Result<Vec<SendTask>, StoreError> {
        self.call(move |conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM send_tasks
                 WHERE state = 'unclaimed' AND send_at <= ?1
                   AND (?2 IS NULL OR campaign_id = ?2)
                 ORDER BY send_at, id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![timestamp(&at), campaign_id.map(|id| id.to_key())],
                task_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn query_due_unclaimed(&self, at: DateTime<Utc>) -> Result<Vec<SendTask>, StoreError> {
        self.due(at, None).await
    }

    async fn query_campaign_due_unclaimed(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<Vec<SendTask>, StoreError> {
        self.due(at, Some(campaign_id)).await
    }

    async fn claim(
        &self,
        task_id: TaskId,
        worker_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let worker_id = worker_id.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE send_tasks SET state = 'claimed', claimed_by = ?2, claimed_at = ?3
                 WHERE id = ?1 AND state = 'unclaimed'",
                params![task_id.to_key(), worker_id, timestamp(&at)],
            )?;
            if changed == 1 {
                return Ok(true);
            }
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM send_tasks WHERE id = ?1)",
                params![task_id.to_key()],
                |row| row.get(0),
            )?;
            if exists {
                Ok(false)
            } else {
                Err(StoreError::TaskNotFound(task_id))
            }
        })
        .await
    }

    async fn release(
        &self,
        task_id: TaskId,
        worker_id: &str,
        next_send_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let worker_id = worker_id.to_string();
        let error = error.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE send_tasks
                 SET state = 'unclaimed', attempts = attempts + 1, send_at = ?3,
                     last_error = ?4, claimed_by = NULL, claimed_at = NULL
                 WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2",
                params![
                    task_id.to_key(),
                    worker_id,
                    timestamp(&next_send_at.min(latest_send_at())),
                    error
                ],
            )?;
            not_claimed_unless(changed, task_id, worker_id)
        })
        .await
    }

    async fn finalize(
        &self,
        task_id: TaskId,
        worker_id: &str,
        outcome: TaskOutcome,
    ) -> Result<(), StoreError> {
        let worker_id = worker_id.to_string();
        self.call(move |conn| {
            let (state, error) = match outcome {
                TaskOutcome::Sent => (ClaimState::Sent, None),
                TaskOutcome::Errored(reason) => (ClaimState::Errored, Some(reason)),
            };
            let changed = conn.execute(
                "UPDATE send_tasks
                 SET state = ?3, attempts = attempts + 1,
                     last_error = COALESCE(?4, last_error),
                     claimed_by = NULL, claimed_at = NULL
                 WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2",
                params![task_id.to_key(), worker_id, state.as_str(), error],
            )?;
            not_claimed_unless(changed, task_id, worker_id)
        })
        .await
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "UPDATE send_tasks SET state = 'unclaimed', claimed_by = NULL, claimed_at = NULL
                 WHERE state = 'claimed' AND claimed_at < ?1",
                params![timestamp(&claimed_before)],
            )?)
        })
        .await
    }

    async fn get_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, StoreError> {
        self.call(move |conn| {
            let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
            conn.query_row(&sql, params![campaign_id.to_key()], campaign_from_row)
                .optional()?
                .ok_or(StoreError::CampaignNotFound(campaign_id))
        })
        .await
    }

    async fn update_campaign_status(
        &self,
        campaign_id: CampaignId,
        status: CampaignStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let completed_at = status.is_settled().then(|| timestamp(&at));
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE campaigns SET status = ?2, completed_at = COALESCE(?3, completed_at)
                 WHERE id = ?1",
                params![campaign_id.to_key(), status.as_str(), completed_at],
            )?;
            if changed == 0 {
                return Err(StoreError::CampaignNotFound(campaign_id));
            }
            Ok(())
        })
        .await
    }

    async fn has_remaining_unclaimed_due(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM send_tasks
                     WHERE campaign_id = ?1 AND state = 'unclaimed' AND send_at <= ?2
                 )",
                params![campaign_id.to_key(), timestamp(&at)],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn campaign_progress(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CampaignProgress, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT state, COUNT(*) FROM send_tasks WHERE campaign_id = ?1 GROUP BY state",
            )?;
            let rows = stmt.query_map(params![campaign_id.to_key()], |row| {
                Ok((parse_column::<ClaimState>(row, 0)?, row.get::<_, i64>(1)?))
            })?;

            let mut progress = CampaignProgress::default();
            for row in rows {
                let (state, count) = row?;
                let count = usize::try_from(count)
                    .map_err(|_| StoreError::Corrupt(format!("negative count for {state}")))?;
                progress.add(state, count);
            }
            Ok(progress)
        })
        .await
    }
}

#[async_trait]
impl CampaignWriter for SqliteTaskStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), StoreError> {
        let campaign = campaign.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO campaigns (id, name, owner, status, created_at, launch_at, send_by, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name, owner = excluded.owner, status = excluded.status,
                     launch_at = excluded.launch_at, send_by = excluded.send_by,
                     completed_at = excluded.completed_at",
                params![
                    campaign.id.to_key(),
                    campaign.name,
                    campaign.owner,
                    campaign.status.as_str(),
                    timestamp(&campaign.created_at),
                    timestamp(&campaign.launch_at),
                    campaign.send_by.as_ref().map(timestamp),
                    campaign.completed_at.as_ref().map(timestamp),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_tasks(&self, tasks: &[SendTask]) -> Result<(), StoreError> {
        let tasks = tasks.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            {
                let sql = format!(
                    "INSERT INTO send_tasks ({TASK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                );
                let mut stmt = tx.prepare(&sql)?;
                for task in &tasks {
                    stmt.execute(params![
                        task.id.to_key(),
                        task.campaign_id.to_key(),
                        task.recipient.email,
                        task.recipient.first_name,
                        task.recipient.last_name,
                        task.recipient.position,
                        timestamp(&task.send_at),
                        task.state.as_str(),
                        task.claimed_by,
                        task.claimed_at.as_ref().map(timestamp),
                        task.attempts,
                        task.last_error,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        self.call(|conn| {
            let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at, id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], campaign_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn not_claimed_unless(changed: usize, task_id: TaskId, worker_id: String) -> Result<(), StoreError> {
    if changed == 1 {
        Ok(())
    } else {
        Err(StoreError::NotClaimed { task_id, worker_id })
    }
}

/// Fixed-width UTC text, so `<=` on the column orders like time.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| conversion_error(idx, format!("{raw:?}: {e}")))
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("{raw:?}: {e}")))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_time(idx, &raw))
        .transpose()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<SendTask> {
    Ok(SendTask {
        id: parse_column(row, 0)?,
        campaign_id: parse_column(row, 1)?,
        recipient: Recipient {
            email: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            position: row.get(5)?,
        },
        send_at: time_column(row, 6)?,
        state: parse_column(row, 7)?,
        claimed_by: row.get(8)?,
        claimed_at: optional_time_column(row, 9)?,
        attempts: row.get(10)?,
        last_error: row.get(11)?,
    })
}

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: parse_column(row, 0)?,
        name: row.get(1)?,
        owner: row.get(2)?,
        status: parse_column(row, 3)?,
        created_at: time_column(row, 4)?,
        launch_at: time_column(row, 5)?,
        send_by: optional_time_column(row, 6)?,
        completed_at: optional_time_column(row, 7)?,
    })
}
