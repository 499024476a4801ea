//! SQLite-backed persistence for campaigns and call attempts.
//! Snapshot-on-write: the snapshot writer saves every attempt whose status
//! changes; callers save campaigns after mutating them.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ringflow_core::error::{Result, RingflowError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::attempt::{Attempt, AttemptStatus};
use crate::campaign::{Campaign, CampaignStatus};
use crate::engine::DispatchEngine;

/// SQLite-backed persistence store for dispatch data.
pub struct DispatchDb {
    conn: rusqlite::Connection,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> RingflowError + '_ {
    move |e| RingflowError::Database(format!("{context}: {e}"))
}

/// A column that holds text the schema does not accept.
fn corrupt(column: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_time(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(column, e))
}

/// Storage rank of a status. Writes never lower it.
fn status_rank(status: &AttemptStatus) -> i32 {
    match status {
        AttemptStatus::Pending => 0,
        AttemptStatus::Calling => 1,
        AttemptStatus::Completed | AttemptStatus::Failed(_) => 2,
    }
}

impl DispatchDb {
    /// Open or create the dispatch database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(db_err("DB open"))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_err("DB open"))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                contact_ids TEXT NOT NULL,          -- JSON array, selection order
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS call_attempts (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                ordinal_index INTEGER NOT NULL,
                interval_minutes INTEGER,
                repeat_count INTEGER NOT NULL DEFAULT 1,
                message TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                status_rank INTEGER NOT NULL DEFAULT 0,
                failure_reason TEXT,
                provider_ref TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_call_attempts_campaign
                ON call_attempts (campaign_id, created_at);
         ",
            )
            .map_err(db_err("Migration"))?;
        Ok(())
    }

    // ─── Campaigns ────────────────────────────────────────────

    pub fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        let contact_ids = serde_json::to_string(&campaign.contact_ids)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO campaigns
                 (id, name, description, contact_ids, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    campaign.id,
                    campaign.name,
                    campaign.description,
                    contact_ids,
                    campaign.status.label(),
                    campaign.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err("Save campaign"))?;
        Ok(())
    }

    pub fn delete_campaign(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM campaigns WHERE id = ?1", [id])
            .map_err(db_err("Delete campaign"))?;
        Ok(())
    }

    /// All campaigns, oldest first.
    pub fn load_campaigns(&self) -> Result<Vec<Campaign>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, contact_ids, status, created_at
                 FROM campaigns ORDER BY created_at",
            )
            .map_err(db_err("Load campaigns"))?;

        let rows = stmt
            .query_map([], |row| {
                let contact_ids: String = row.get(3)?;
                let status: String = row.get(4)?;
                let created_at: String = row.get(5)?;
                let contact_ids: Vec<String> =
                    serde_json::from_str(&contact_ids).map_err(|e| corrupt(3, e))?;
                if contact_ids.is_empty() {
                    return Err(corrupt(3, RingflowError::Database("campaign without contacts".into())));
                }
                let status = CampaignStatus::parse(&status).ok_or_else(|| {
                    corrupt(4, RingflowError::Database(format!("unknown campaign status '{status}'")))
                })?;
                Ok(Campaign {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    contact_ids,
                    status,
                    created_at: parse_time(5, &created_at)?,
                })
            })
            .map_err(db_err("Load campaigns"))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Load campaigns"))
    }

    // ─── Attempts ─────────────────────────────────────────────

    /// Upsert an attempt. A stored terminal status is never overwritten by
    /// an older snapshot.
    pub fn save_attempt(&self, attempt: &Attempt) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO call_attempts
                 (id, campaign_id, contact_id, scheduled_time, ordinal_index, interval_minutes,
                  repeat_count, message, status, status_rank, failure_reason, provider_ref,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    status_rank = excluded.status_rank,
                    failure_reason = excluded.failure_reason,
                    provider_ref = excluded.provider_ref,
                    updated_at = excluded.updated_at
                 WHERE excluded.status_rank >= call_attempts.status_rank",
                rusqlite::params![
                    attempt.id,
                    attempt.campaign_id,
                    attempt.contact_id,
                    attempt.scheduled_time.to_rfc3339(),
                    attempt.ordinal_index as i64,
                    attempt.interval_minutes,
                    attempt.repeat_count,
                    attempt.message,
                    attempt.status.label(),
                    status_rank(&attempt.status),
                    attempt.status.failure_reason(),
                    attempt.provider_ref,
                    attempt.created_at.to_rfc3339(),
                    attempt.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err("Save attempt"))?;
        Ok(())
    }

    pub fn save_attempts(&self, attempts: &[Attempt]) -> Result<()> {
        for attempt in attempts {
            self.save_attempt(attempt)?;
        }
        Ok(())
    }

    /// All attempts in creation order.
    pub fn load_attempts(&self) -> Result<Vec<Attempt>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, campaign_id, contact_id, scheduled_time, ordinal_index, interval_minutes,
                        repeat_count, message, status, failure_reason, provider_ref, created_at, updated_at
                 FROM call_attempts ORDER BY created_at, ordinal_index",
            )
            .map_err(db_err("Load attempts"))?;

        let rows = stmt
            .query_map([], |row| {
                let scheduled_time: String = row.get(3)?;
                let ordinal_index: i64 = row.get(4)?;
                let status: String = row.get(8)?;
                let failure_reason: Option<String> = row.get(9)?;
                let created_at: String = row.get(11)?;
                let updated_at: String = row.get(12)?;
                let ordinal_index = usize::try_from(ordinal_index).map_err(|e| corrupt(4, e))?;
                let status = AttemptStatus::from_parts(&status, failure_reason).ok_or_else(|| {
                    corrupt(8, RingflowError::Database(format!("unknown attempt status '{status}'")))
                })?;
                Ok(Attempt {
                    id: row.get(0)?,
                    campaign_id: row.get(1)?,
                    contact_id: row.get(2)?,
                    scheduled_time: parse_time(3, &scheduled_time)?,
                    ordinal_index,
                    interval_minutes: row.get(5)?,
                    repeat_count: row.get(6)?,
                    message: row.get(7)?,
                    status,
                    provider_ref: row.get(10)?,
                    created_at: parse_time(11, &created_at)?,
                    updated_at: parse_time(12, &updated_at)?,
                })
            })
            .map_err(db_err("Load attempts"))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Load attempts"))
    }
}

/// Persist every attempt whose status changes, until the engine goes away.
pub fn spawn_snapshot_writer(engine: DispatchEngine, db: Arc<Mutex<DispatchDb>>) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            let targets: Vec<Attempt> = match events.recv().await {
                Ok(change) => engine.attempt(&change.attempt_id).await.into_iter().collect(),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("⚠️ Snapshot writer lagged by {missed} events, saving all attempts");
                    engine.attempts().await
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let saved = match db.lock() {
                Ok(db) => db.save_attempts(&targets),
                Err(poisoned) => poisoned.into_inner().save_attempts(&targets),
            };
            if let Err(e) = saved {
                tracing::warn!("⚠️ Failed to save attempt snapshot: {e}");
            }
        }
    })
}
