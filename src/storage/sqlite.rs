//! SQLite implementation of the repositories
//!
//! One `SqliteStore` serves users, jobs and quizzes. The connection sits
//! behind a `Mutex`; separate stores (or processes) opened on the same file
//! coordinate through WAL mode, a busy timeout and conditional updates.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::repository::{
    ClaimOutcome, JobRepository, Lease, LeaseSweep, QuizRepository, UserRepository,
};
use crate::models::{
    Destination, GeneratedItem, MediaPayload, Quiz, QuotaRecord, RenderFormat, ScheduledJob,
    UserId,
};

const JOB_COLUMNS: &str = "id, owner, chat_id, destination_label, kind, text, title, media, \
     media_type, difficulty, allow_beyond_source, desired_count, format, pacing_seconds, \
     scheduled_at, status, created_at, claimed_by, claimed_at, lease_expires_at, attempts, \
     error_message";

const USER_COLUMNS: &str = "id, username, daily_count, activity_date, last_submission_at, \
     is_premium, api_key_fingerprint, total_submissions, total_generations, \
     total_items_generated, questions_per_request, default_format";

const QUIZ_COLUMNS: &str = "id, title, owner, items, created_at, play_count, share_count";

/// SQLite-backed store implementing every repository trait
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to enable WAL mode")?;
        conn.busy_timeout(StdDuration::from_secs(5))
            .context("Failed to set busy timeout")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection mutex poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY,
                    username TEXT,
                    daily_count INTEGER NOT NULL DEFAULT 0,
                    activity_date TEXT,
                    last_submission_at TEXT,
                    is_premium INTEGER NOT NULL DEFAULT 0,
                    api_key_fingerprint TEXT,
                    total_submissions INTEGER NOT NULL DEFAULT 0,
                    total_generations INTEGER NOT NULL DEFAULT 0,
                    total_items_generated INTEGER NOT NULL DEFAULT 0,
                    questions_per_request INTEGER NOT NULL DEFAULT 5,
                    default_format TEXT NOT NULL DEFAULT 'text',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS scheduled_jobs (
                    id TEXT PRIMARY KEY,
                    owner INTEGER NOT NULL,
                    chat_id INTEGER NOT NULL,
                    destination_label TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    text TEXT,
                    title TEXT,
                    media BLOB,
                    media_type TEXT,
                    difficulty TEXT NOT NULL,
                    allow_beyond_source INTEGER NOT NULL DEFAULT 0,
                    desired_count INTEGER NOT NULL,
                    format TEXT NOT NULL,
                    pacing_seconds INTEGER NOT NULL,
                    scheduled_at TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL,
                    claimed_by TEXT,
                    claimed_at TEXT,
                    lease_expires_at TEXT,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due
                    ON scheduled_jobs(status, scheduled_at);

                CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_owner
                    ON scheduled_jobs(owner);

                CREATE TABLE IF NOT EXISTS quizzes (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    owner INTEGER NOT NULL,
                    items TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    play_count INTEGER NOT NULL DEFAULT 0,
                    share_count INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_quizzes_owner
                    ON quizzes(owner, created_at);
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn ensure_user(conn: &Connection, user_id: UserId) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
            params![user_id, ts(Utc::now())],
        )
        .context("Failed to create user")?;
        Ok(())
    }

    fn select_user(conn: &Connection, user_id: UserId) -> Result<Option<QuotaRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        conn.query_row(&sql, params![user_id], user_from_row)
            .optional()
            .context("Failed to get user")
    }

    fn select_job(conn: &Connection, id: &str) -> Result<Option<ScheduledJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = ?1");
        conn.query_row(&sql, params![id], job_from_row)
            .optional()
            .context("Failed to get scheduled job")
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    let source: Box<dyn std::error::Error + Send + Sync> = Box::from(msg);
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, source)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => parse_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn parse_enum<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn counter(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<QuotaRecord> {
    Ok(QuotaRecord {
        user_id: row.get(0)?,
        username: row.get(1)?,
        daily_count: row.get(2)?,
        activity_date: row.get(3)?,
        last_submission_at: parse_opt_ts(row, 4)?,
        is_premium: row.get(5)?,
        api_key_fingerprint: row.get(6)?,
        total_submissions: counter(row, 7)?,
        total_generations: counter(row, 8)?,
        total_items_generated: counter(row, 9)?,
        questions_per_request: row.get(10)?,
        default_format: parse_enum(row, 11)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledJob> {
    let media = match (row.get::<_, Option<Vec<u8>>>(7)?, row.get::<_, Option<String>>(8)?) {
        (Some(bytes), Some(media_type)) => Some(MediaPayload::new(bytes, media_type)),
        _ => None,
    };

    Ok(ScheduledJob {
        id: row.get(0)?,
        owner: row.get(1)?,
        destination: Destination::new(row.get::<_, i64>(2)?, row.get::<_, String>(3)?),
        kind: parse_enum(row, 4)?,
        text: row.get(5)?,
        title: row.get(6)?,
        media,
        difficulty: parse_enum(row, 9)?,
        allow_beyond_source: row.get(10)?,
        desired_count: row.get(11)?,
        format: parse_enum(row, 12)?,
        pacing_seconds: row.get(13)?,
        scheduled_at: parse_ts(row, 14)?,
        status: parse_enum(row, 15)?,
        created_at: parse_ts(row, 16)?,
        claimed_by: row.get(17)?,
        claimed_at: parse_opt_ts(row, 18)?,
        lease_expires_at: parse_opt_ts(row, 19)?,
        attempts: row.get(20)?,
        error_message: row.get(21)?,
    })
}

fn quiz_from_row(row: &Row<'_>) -> rusqlite::Result<Quiz> {
    let raw_items: String = row.get(3)?;
    let items: Vec<GeneratedItem> = serde_json::from_str(&raw_items)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Quiz {
        id: row.get(0)?,
        title: row.get(1)?,
        owner: row.get(2)?,
        items,
        created_at: parse_ts(row, 4)?,
        play_count: counter(row, 5)?,
        share_count: counter(row, 6)?,
    })
}

// ============================================================================
// UserRepository
// ============================================================================

impl UserRepository for SqliteStore {
    fn get_or_create(&self, user_id: UserId) -> Result<QuotaRecord> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        Self::select_user(&conn, user_id)?
            .ok_or_else(|| anyhow::anyhow!("User {user_id} vanished after insert"))
    }

    fn get_user(&self, user_id: UserId) -> Result<Option<QuotaRecord>> {
        let conn = self.conn()?;
        Self::select_user(&conn, user_id)
    }

    fn reset_daily_if_stale(&self, user_id: UserId, today: &str) -> Result<bool> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        let changed = conn
            .execute(
                "UPDATE users SET daily_count = 0, activity_date = ?2
                 WHERE id = ?1 AND (activity_date IS NULL OR activity_date != ?2)",
                params![user_id, today],
            )
            .context("Failed to reset daily counter")?;
        Ok(changed == 1)
    }

    fn record_submission(&self, user_id: UserId, today: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET
                 daily_count = CASE WHEN activity_date = ?2 THEN daily_count + 1 ELSE 1 END,
                 activity_date = ?2,
                 last_submission_at = ?3,
                 total_submissions = total_submissions + 1
             WHERE id = ?1",
            params![user_id, today, ts(now)],
        )
        .context("Failed to record submission")?;
        Ok(())
    }

    fn touch_submission(&self, user_id: UserId, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET last_submission_at = ?2 WHERE id = ?1",
            params![user_id, ts(now)],
        )
        .context("Failed to stamp submission")?;
        Ok(())
    }

    fn consume_quota(&self, user_id: UserId, today: &str) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET
                 daily_count = CASE WHEN activity_date = ?2 THEN daily_count + 1 ELSE 1 END,
                 activity_date = ?2,
                 total_submissions = total_submissions + 1
             WHERE id = ?1",
            params![user_id, today],
        )
        .context("Failed to consume quota")?;
        Ok(())
    }

    fn record_generation(&self, user_id: UserId, items: u64) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET
                 total_generations = total_generations + 1,
                 total_items_generated = total_items_generated + ?2
             WHERE id = ?1",
            params![user_id, items as i64],
        )
        .context("Failed to record generation")?;
        Ok(())
    }

    fn set_premium(&self, user_id: UserId, premium: bool) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET is_premium = ?2 WHERE id = ?1",
            params![user_id, premium],
        )
        .context("Failed to update premium flag")?;
        Ok(())
    }

    fn set_api_key_fingerprint(&self, user_id: UserId, fingerprint: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET api_key_fingerprint = ?2 WHERE id = ?1",
            params![user_id, fingerprint],
        )
        .context("Failed to update API key fingerprint")?;
        Ok(())
    }

    fn set_questions_per_request(&self, user_id: UserId, count: u32) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET questions_per_request = ?2 WHERE id = ?1",
            params![user_id, count.max(1)],
        )
        .context("Failed to update questions per request")?;
        Ok(())
    }

    fn set_default_format(&self, user_id: UserId, format: RenderFormat) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_user(&conn, user_id)?;
        conn.execute(
            "UPDATE users SET default_format = ?2 WHERE id = ?1",
            params![user_id, format.as_str()],
        )
        .context("Failed to update default format")?;
        Ok(())
    }
}

// ============================================================================
// JobRepository
// ============================================================================

impl JobRepository for SqliteStore {
    fn insert_job(&self, job: &ScheduledJob) -> Result<()> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO scheduled_jobs ({JOB_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                     ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
        );
        conn.execute(
            &sql,
            params![
                job.id,
                job.owner,
                job.destination.chat_id,
                job.destination.label,
                job.kind.as_str(),
                job.text,
                job.title,
                job.media.as_ref().map(|m| m.bytes.as_slice()),
                job.media.as_ref().map(|m| m.media_type.as_str()),
                job.difficulty.label(),
                job.allow_beyond_source,
                job.desired_count,
                job.format.as_str(),
                job.pacing_seconds,
                ts(job.scheduled_at),
                job.status.as_str(),
                ts(job.created_at),
                job.claimed_by,
                job.claimed_at.map(ts),
                job.lease_expires_at.map(ts),
                job.attempts,
                job.error_message,
            ],
        )
        .context("Failed to insert scheduled job")?;

        tracing::debug!(job_id = %job.id, owner = job.owner, "Scheduled job stored");
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<ScheduledJob>> {
        let conn = self.conn()?;
        Self::select_job(&conn, id)
    }

    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs
             WHERE status = 'pending' AND scheduled_at <= ?1
             ORDER BY scheduled_at ASC
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare due query")?;
        let jobs = stmt
            .query_map(params![ts(now), limit as i64], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to fetch due jobs")?;
        Ok(jobs)
    }

    fn claim(&self, id: &str, lease: &Lease) -> Result<ClaimOutcome> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_jobs SET
                     status = 'processing',
                     claimed_by = ?2,
                     claimed_at = ?3,
                     lease_expires_at = ?4,
                     attempts = attempts + 1
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    id,
                    lease.worker_id,
                    ts(lease.now),
                    ts(lease.expires_at())
                ],
            )
            .context("Failed to claim job")?;

        Ok(if changed == 1 {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::Lost
        })
    }

    fn reclaim_expired(&self, lease: &Lease, max_attempts: u32) -> Result<LeaseSweep> {
        let conn = self.conn()?;
        let now = ts(lease.now);

        let expired: Vec<(String, u32)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT id, attempts FROM scheduled_jobs
                     WHERE status = 'processing' AND lease_expires_at <= ?1
                     ORDER BY scheduled_at ASC",
                )
                .context("Failed to prepare lease sweep")?;
            let rows = stmt
                .query_map(params![now], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to scan expired leases")?;
            rows
        };

        let mut sweep = LeaseSweep::default();
        for (id, attempts) in expired {
            if attempts >= max_attempts {
                let message = format!("Lease expired after {attempts} attempt(s)");
                let changed = conn
                    .execute(
                        "UPDATE scheduled_jobs SET status = 'failed', error_message = ?3
                         WHERE id = ?1 AND status = 'processing' AND lease_expires_at <= ?2",
                        params![id, now, message],
                    )
                    .context("Failed to fail exhausted job")?;
                if changed == 1 {
                    sweep.exhausted.push(id);
                }
                continue;
            }

            let changed = conn
                .execute(
                    "UPDATE scheduled_jobs SET
                         claimed_by = ?2,
                         claimed_at = ?3,
                         lease_expires_at = ?4,
                         attempts = attempts + 1
                     WHERE id = ?1 AND status = 'processing' AND lease_expires_at <= ?3",
                    params![id, lease.worker_id, now, ts(lease.expires_at())],
                )
                .context("Failed to take over expired lease")?;
            if changed == 1 {
                if let Some(job) = Self::select_job(&conn, &id)? {
                    sweep.reclaimed.push(job);
                }
            }
        }

        Ok(sweep)
    }

    fn extend_lease(&self, id: &str, worker_id: &str, until: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_jobs SET lease_expires_at = ?3
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2",
                params![id, worker_id, ts(until)],
            )
            .context("Failed to extend lease")?;
        Ok(changed == 1)
    }

    fn mark_sent(&self, id: &str, worker_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_jobs SET status = 'sent', error_message = NULL
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2",
                params![id, worker_id],
            )
            .context("Failed to mark job sent")?;
        Ok(changed == 1)
    }

    fn mark_failed(&self, id: &str, worker_id: &str, error: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_jobs SET status = 'failed', error_message = ?3
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2",
                params![id, worker_id, error],
            )
            .context("Failed to mark job failed")?;
        Ok(changed == 1)
    }

    fn list_jobs_for_owner(&self, owner: UserId) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE owner = ?1 ORDER BY scheduled_at ASC"
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare job listing")?;
        let jobs = stmt
            .query_map(params![owner], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list jobs")?;
        Ok(jobs)
    }

    fn delete_job_for_owner(&self, id: &str, owner: UserId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM scheduled_jobs WHERE id = ?1 AND owner = ?2 AND status != 'processing'",
                params![id, owner],
            )
            .context("Failed to delete job")?;
        Ok(changed == 1)
    }
}

// ============================================================================
// QuizRepository
// ============================================================================

impl QuizRepository for SqliteStore {
    fn insert_quiz(&self, quiz: &Quiz) -> Result<()> {
        let items = serde_json::to_string(&quiz.items).context("Failed to serialize quiz items")?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO quizzes (id, title, owner, items, created_at, play_count, share_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                quiz.id,
                quiz.title,
                quiz.owner,
                items,
                ts(quiz.created_at),
                quiz.play_count as i64,
                quiz.share_count as i64
            ],
        )
        .context("Failed to insert quiz")?;
        Ok(())
    }

    fn get_quiz(&self, id: &str) -> Result<Option<Quiz>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = ?1");
        conn.query_row(&sql, params![id], quiz_from_row)
            .optional()
            .context("Failed to get quiz")
    }

    fn list_quizzes_for_owner(&self, owner: UserId, limit: usize) -> Result<Vec<Quiz>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {QUIZ_COLUMNS} FROM quizzes WHERE owner = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare quiz listing")?;
        let quizzes = stmt
            .query_map(params![owner, limit as i64], quiz_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list quizzes")?;
        Ok(quizzes)
    }

    fn increment_play(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE quizzes SET play_count = play_count + 1 WHERE id = ?1",
                params![id],
            )
            .context("Failed to increment play count")?;
        Ok(changed == 1)
    }

    fn increment_share(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE quizzes SET share_count = share_count + 1 WHERE id = ?1",
                params![id],
            )
            .context("Failed to increment share count")?;
        Ok(changed == 1)
    }
}
