//! Execution of a claimed job
//!
//! ```text
//!   claimed job ──▶ generate_for_request ──▶ DeliveryEngine::deliver
//!                        │ error / 0 items          │ error
//!                        ▼                          ▼
//!                   mark_failed ◀───────────────────┘
//!                                                   │ ok
//!                                                   ▼
//!                                  mark_sent ──▶ owner summary
//! ```
//!
//! Every failure is terminal for the job; nothing here propagates an error
//! to the poll loop. Completion writes are conditional on still owning the
//! job, so a worker whose lease was taken over cannot overwrite the new
//! owner's result.
//!
//! The lease is renewed before every paced send. Once a renewal finds the
//! job owned by another worker, delivery stops at that item.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use crate::delivery::{CancelSignal, DeliveryEngine, DeliveryPlan, Pacing, SendGuard};
use crate::generation::{generate_for_request, QuestionGenerator};
use crate::metrics;
use crate::models::{Destination, ScheduledJob};
use crate::storage::JobRepository;

/// What happened to one claimed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Sent { delivered: usize },
    Failed { reason: String },
    /// Another worker owns the job now; our result was discarded
    Superseded,
}

/// Default lease, matching the scheduler configuration default
const DEFAULT_LEASE_SECS: u64 = 900;

/// Renews a job lease ahead of each send
struct LeaseRenewal<'a> {
    jobs: &'a dyn JobRepository,
    job_id: &'a str,
    worker_id: &'a str,
    window: ChronoDuration,
}

impl SendGuard for LeaseRenewal<'_> {
    fn may_send(&self) -> bool {
        match self
            .jobs
            .extend_lease(self.job_id, self.worker_id, Utc::now() + self.window)
        {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(job_id = %self.job_id, "Lease lost during delivery, stopping");
                false
            }
            Err(e) => {
                // completion is still ownership-checked
                tracing::warn!(job_id = %self.job_id, error = %e, "Lease renewal failed");
                true
            }
        }
    }
}

/// How a run ended short of a terminal write
enum RunEnd {
    Delivered(usize),
    Lost,
}

/// Runs claimed jobs end to end
#[derive(Clone)]
pub struct JobExecutor {
    generator: Arc<dyn QuestionGenerator>,
    delivery: DeliveryEngine,
    jobs: Arc<dyn JobRepository>,
    max_chunk_chars: usize,
    min_pacing_secs: u32,
    max_pacing_secs: u32,
    lease: ChronoDuration,
    operator: Option<Destination>,
}

impl JobExecutor {
    pub fn new(
        generator: Arc<dyn QuestionGenerator>,
        delivery: DeliveryEngine,
        jobs: Arc<dyn JobRepository>,
        max_chunk_chars: usize,
    ) -> Self {
        Self {
            generator,
            delivery,
            jobs,
            max_chunk_chars,
            min_pacing_secs: Pacing::MIN_SECS,
            max_pacing_secs: Pacing::MAX_SECS,
            lease: secs(DEFAULT_LEASE_SECS),
            operator: None,
        }
    }

    /// Override the 5..=60 second pacing range; `0` minimum allows immediate sends
    pub fn with_pacing_bounds(mut self, min_secs: u32, max_secs: u32) -> Self {
        self.min_pacing_secs = min_secs;
        self.max_pacing_secs = max_secs;
        self
    }

    /// Base lease held while a job runs
    pub fn with_lease_secs(mut self, lease_secs: u64) -> Self {
        self.lease = secs(lease_secs);
        self
    }

    pub fn base_lease(&self) -> ChronoDuration {
        self.lease
    }

    fn pacing_for(&self, job: &ScheduledJob) -> Pacing {
        Pacing::within(job.pacing_seconds, self.min_pacing_secs, self.max_pacing_secs)
    }

    /// Lease to take when claiming `job`: the base lease plus every pacing gap
    pub fn lease_for(&self, job: &ScheduledJob) -> ChronoDuration {
        let gaps = u64::from(job.desired_count.saturating_sub(1));
        let pacing = self.pacing_for(job).duration().as_secs();
        self.lease + secs(gaps.saturating_mul(pacing))
    }

    /// Renewal horizon: one send plus the next pacing gap
    fn renewal_window(&self, job: &ScheduledJob) -> ChronoDuration {
        self.lease + secs(self.pacing_for(job).duration().as_secs())
    }

    /// Destination that receives failure notices
    pub fn with_operator(mut self, operator: Option<Destination>) -> Self {
        self.operator = operator;
        self
    }

    /// Execute a job this worker has claimed
    pub async fn execute(&self, job: &ScheduledJob, worker_id: &str) -> JobOutcome {
        tracing::info!(
            job_id = %job.id,
            user_id = job.owner,
            destination = %job.destination,
            attempt = job.attempts,
            "Executing scheduled job"
        );

        match self.run(job, worker_id).await {
            Ok(RunEnd::Delivered(delivered)) => self.complete(job, worker_id, delivered).await,
            Ok(RunEnd::Lost) => JobOutcome::Superseded,
            Err(reason) => self.fail(job, worker_id, reason).await,
        }
    }

    async fn run(&self, job: &ScheduledJob, worker_id: &str) -> Result<RunEnd, String> {
        let request = job.to_request();
        let outcome = generate_for_request(self.generator.as_ref(), &request, self.max_chunk_chars, None)
            .await
            .map_err(|e| e.to_string())?;

        let plan = DeliveryPlan {
            owner: job.owner,
            destination: job.destination.clone(),
            title: request.quiz_title(),
            items: outcome.items,
            format: job.format,
            pacing: self.pacing_for(job),
        };

        let guard = LeaseRenewal {
            jobs: self.jobs.as_ref(),
            job_id: &job.id,
            worker_id,
            window: self.renewal_window(job),
        };
        let report = self
            .delivery
            .deliver_guarded(plan, CancelSignal::never(), &guard)
            .await
            .map_err(|e| e.to_string())?;

        if report.halted {
            tracing::warn!(
                job_id = %job.id,
                delivered = report.delivered,
                "Job taken over mid-delivery"
            );
            return Ok(RunEnd::Lost);
        }

        if report.failed > 0 {
            tracing::warn!(
                job_id = %job.id,
                delivered = report.delivered,
                failed = report.failed,
                "Some items were not delivered"
            );
        }
        Ok(RunEnd::Delivered(report.delivered))
    }

    async fn complete(&self, job: &ScheduledJob, worker_id: &str, delivered: usize) -> JobOutcome {
        match self.jobs.mark_sent(&job.id, worker_id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Lost ownership before marking sent");
                return JobOutcome::Superseded;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job sent");
                return JobOutcome::Failed {
                    reason: format!("{e:#}"),
                };
            }
        }

        metrics::record_job_outcome(true);
        tracing::info!(job_id = %job.id, delivered, "Scheduled job sent");

        let summary = format!(
            "Scheduled quiz posted: {delivered} questions to {}",
            job.destination.label
        );
        if let Err(e) = self
            .delivery
            .sender()
            .send_text(&Destination::direct(job.owner), &summary)
            .await
        {
            tracing::debug!(job_id = %job.id, error = %e, "Owner summary not sent");
        }

        JobOutcome::Sent { delivered }
    }

    async fn fail(&self, job: &ScheduledJob, worker_id: &str, reason: String) -> JobOutcome {
        tracing::warn!(job_id = %job.id, user_id = job.owner, reason = %reason, "Scheduled job failed");

        match self.jobs.mark_failed(&job.id, worker_id, &reason) {
            Ok(true) => metrics::record_job_outcome(false),
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Lost ownership before marking failed");
                return JobOutcome::Superseded;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job failed");
            }
        }

        if let Some(operator) = &self.operator {
            let notice = format!(
                "Scheduled job {} for user {} failed: {reason}",
                job.id, job.owner
            );
            if let Err(e) = self.delivery.sender().send_text(operator, &notice).await {
                tracing::debug!(job_id = %job.id, error = %e, "Operator notice not sent");
            }
        }

        JobOutcome::Failed { reason }
    }
}

/// Leases never exceed a year
const MAX_LEASE_SECS: u64 = 365 * 24 * 3600;

fn secs(secs: u64) -> ChronoDuration {
    ChronoDuration::seconds(secs.min(MAX_LEASE_SECS) as i64)
}
