//! Creating, listing and deleting scheduled jobs
//!
//! Schedule times are typed by users in local time (`YYYY-MM-DD HH:MM`,
//! configured UTC offset) and stored as UTC instants. A time in the past is
//! accepted; the job simply becomes due on the next poll tick.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;

use super::error::{SchedulerError, SchedulerResult};
use crate::delivery::Pacing;
use crate::models::{Destination, GenerationRequest, RenderFormat, ScheduledJob, UserId};
use crate::storage::JobRepository;
use crate::utils::local_to_utc;

/// Input format for schedule times
pub const SCHEDULE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a local `YYYY-MM-DD HH:MM` time into a UTC instant
pub fn parse_schedule_time(input: &str, utc_offset_hours: i32) -> SchedulerResult<DateTime<Utc>> {
    let trimmed = input.trim();
    let local = NaiveDateTime::parse_from_str(trimmed, SCHEDULE_TIME_FORMAT)
        .map_err(|_| SchedulerError::invalid_time(trimmed))?;
    local_to_utc(local, utc_offset_hours).ok_or_else(|| SchedulerError::invalid_time(trimmed))
}

/// Owner-facing job operations
#[derive(Clone)]
pub struct JobBook {
    jobs: Arc<dyn JobRepository>,
    utc_offset_hours: i32,
    min_pacing_secs: u32,
    max_pacing_secs: u32,
}

impl JobBook {
    pub fn new(jobs: Arc<dyn JobRepository>, utc_offset_hours: i32) -> Self {
        Self {
            jobs,
            utc_offset_hours,
            min_pacing_secs: Pacing::MIN_SECS,
            max_pacing_secs: Pacing::MAX_SECS,
        }
    }

    /// Use configured pacing bounds instead of 5..=60
    pub fn with_pacing_bounds(mut self, min_secs: u32, max_secs: u32) -> Self {
        self.min_pacing_secs = min_secs;
        self.max_pacing_secs = max_secs.max(min_secs);
        self
    }

    /// Persist a pending job due at the local time `when`
    pub fn schedule(
        &self,
        request: GenerationRequest,
        destination: Destination,
        format: RenderFormat,
        pacing_secs: u32,
        when: &str,
    ) -> SchedulerResult<ScheduledJob> {
        let scheduled_at = parse_schedule_time(when, self.utc_offset_hours)?;
        self.schedule_at(request, destination, format, pacing_secs, scheduled_at)
    }

    /// Persist a pending job due at an absolute instant
    pub fn schedule_at(
        &self,
        request: GenerationRequest,
        destination: Destination,
        format: RenderFormat,
        pacing_secs: u32,
        scheduled_at: DateTime<Utc>,
    ) -> SchedulerResult<ScheduledJob> {
        let pacing_secs = pacing_secs.clamp(self.min_pacing_secs, self.max_pacing_secs);
        let job = ScheduledJob::from_request(request, destination, format, pacing_secs, scheduled_at);

        self.jobs
            .insert_job(&job)
            .map_err(|e| SchedulerError::store("insert_job", &e))?;

        tracing::info!(
            job_id = %job.id,
            user_id = job.owner,
            destination = %job.destination,
            scheduled_at = %job.scheduled_at,
            "Job scheduled"
        );
        Ok(job)
    }

    pub fn list(&self, owner: UserId) -> SchedulerResult<Vec<ScheduledJob>> {
        self.jobs
            .list_jobs_for_owner(owner)
            .map_err(|e| SchedulerError::store("list_jobs_for_owner", &e))
    }

    /// Delete one of the owner's jobs; a job being processed is refused
    pub fn delete(&self, owner: UserId, id: &str) -> SchedulerResult<()> {
        if self
            .jobs
            .delete_job_for_owner(id, owner)
            .map_err(|e| SchedulerError::store("delete_job_for_owner", &e))?
        {
            tracing::info!(job_id = %id, user_id = owner, "Job deleted");
            return Ok(());
        }

        let existing = self
            .jobs
            .get_job(id)
            .map_err(|e| SchedulerError::store("get_job", &e))?;
        match existing {
            Some(job) if job.owner == owner => Err(SchedulerError::JobInProgress { id: id.to_string() }),
            _ => Err(SchedulerError::not_found(id)),
        }
    }

    /// Local display form of a job's due time
    pub fn local_time(&self, job: &ScheduledJob) -> String {
        crate::utils::format_local(job.scheduled_at, self.utc_offset_hours)
    }
}
