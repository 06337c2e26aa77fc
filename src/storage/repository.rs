//! Repository pattern for persistence
//!
//! Trait-based repositories decouple quota, scheduling and delivery from the
//! storage engine. [`super::SqliteStore`] implements all three; tests can
//! swap in their own implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           QuotaGate / Poller / DeliveryEngine               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Repository Traits                         │
//! │     UserRepository, JobRepository, QuizRepository           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              SqliteStore (Mutex<Connection>)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every job state change is a single conditional `UPDATE` whose affected
//! row count decides the outcome, so two workers sharing one database file
//! never both win the same transition.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::models::{Quiz, QuotaRecord, RenderFormat, ScheduledJob, UserId};

// ============================================================================
// Core Types
// ============================================================================

/// Result of an attempt to claim a pending job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This worker now owns the job
    Claimed,
    /// Another worker got there first, or the job is no longer pending
    Lost,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Lease parameters used by claim and takeover
#[derive(Debug, Clone)]
pub struct Lease {
    pub worker_id: String,
    pub now: DateTime<Utc>,
    pub duration: Duration,
}

impl Lease {
    pub fn new(worker_id: impl Into<String>, now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            worker_id: worker_id.into(),
            now,
            duration,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.now + self.duration
    }
}

/// What one expired-lease sweep did
#[derive(Debug, Clone, Default)]
pub struct LeaseSweep {
    /// Jobs whose ownership moved to the sweeping worker
    pub reclaimed: Vec<ScheduledJob>,
    /// Ids of jobs marked failed after exhausting their attempts
    pub exhausted: Vec<String>,
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Per-user quota state and settings
pub trait UserRepository: Send + Sync {
    /// Fetch a user, creating a fresh record on first contact
    fn get_or_create(&self, user_id: UserId) -> Result<QuotaRecord>;

    /// Fetch a user without creating one
    fn get_user(&self, user_id: UserId) -> Result<Option<QuotaRecord>>;

    /// Zero the daily counter when the stored activity date differs from `today`.
    /// Returns whether a reset happened.
    fn reset_daily_if_stale(&self, user_id: UserId, today: &str) -> Result<bool>;

    /// Stamp the submission time and bump daily and lifetime counters
    fn record_submission(&self, user_id: UserId, today: &str, now: DateTime<Utc>) -> Result<()>;

    /// Stamp the submission time only; starts the cooldown
    fn touch_submission(&self, user_id: UserId, now: DateTime<Utc>) -> Result<()>;

    /// Bump daily and lifetime counters without touching the submission time
    fn consume_quota(&self, user_id: UserId, today: &str) -> Result<()>;

    /// Bump lifetime generation counters after a successful delivery
    fn record_generation(&self, user_id: UserId, items: u64) -> Result<()>;

    fn set_premium(&self, user_id: UserId, premium: bool) -> Result<()>;

    /// Store (or clear) the fingerprint of a user-supplied API key
    fn set_api_key_fingerprint(&self, user_id: UserId, fingerprint: Option<&str>) -> Result<()>;

    fn set_questions_per_request(&self, user_id: UserId, count: u32) -> Result<()>;

    fn set_default_format(&self, user_id: UserId, format: RenderFormat) -> Result<()>;
}

/// Scheduled job persistence and state transitions
pub trait JobRepository: Send + Sync {
    fn insert_job(&self, job: &ScheduledJob) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<Option<ScheduledJob>>;

    /// Pending jobs with `scheduled_at <= now`, oldest first
    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>>;

    /// Conditionally move `pending -> processing` under the given lease
    fn claim(&self, id: &str, lease: &Lease) -> Result<ClaimOutcome>;

    /// Take over `processing` jobs whose lease expired, failing those out of attempts
    fn reclaim_expired(&self, lease: &Lease, max_attempts: u32) -> Result<LeaseSweep>;

    /// Push the lease of a `processing` job out to `until`, only while
    /// `worker_id` still owns it. `false` means ownership was lost.
    fn extend_lease(&self, id: &str, worker_id: &str, until: DateTime<Utc>) -> Result<bool>;

    /// `processing -> sent`, only while `worker_id` still owns the job
    fn mark_sent(&self, id: &str, worker_id: &str) -> Result<bool>;

    /// `processing -> failed`, only while `worker_id` still owns the job
    fn mark_failed(&self, id: &str, worker_id: &str, error: &str) -> Result<bool>;

    /// All jobs of an owner, by scheduled time
    fn list_jobs_for_owner(&self, owner: UserId) -> Result<Vec<ScheduledJob>>;

    /// Delete an owner's job unless it is being processed
    fn delete_job_for_owner(&self, id: &str, owner: UserId) -> Result<bool>;
}

/// Quiz library
pub trait QuizRepository: Send + Sync {
    fn insert_quiz(&self, quiz: &Quiz) -> Result<()>;

    fn get_quiz(&self, id: &str) -> Result<Option<Quiz>>;

    /// An owner's quizzes, newest first
    fn list_quizzes_for_owner(&self, owner: UserId, limit: usize) -> Result<Vec<Quiz>>;

    fn increment_play(&self, id: &str) -> Result<bool>;

    fn increment_share(&self, id: &str) -> Result<bool>;
}
