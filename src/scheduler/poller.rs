//! Interval poller for scheduled jobs
//!
//! Each tick:
//! 1. sweeps `processing` jobs whose lease expired (take over or fail),
//! 2. fetches up to `batch_size` due `pending` jobs, oldest first,
//! 3. claims each with a conditional update and executes the ones it won.
//!
//! A claim's lease covers the job's whole paced run, and the executor keeps
//! renewing it while sending.
//!
//! A tick that is still running when the next one is due is not doubled up:
//! the interval skips missed ticks and an in-progress flag turns any
//! concurrent `tick()` call into a no-op.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::error::{SchedulerError, SchedulerResult};
use super::executor::{JobExecutor, JobOutcome};
use crate::config::SchedulerConfig;
use crate::metrics;
use crate::models::ScheduledJob;
use crate::storage::{ClaimOutcome, JobRepository, Lease};

/// Counters for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick did not run because another was in progress
    pub skipped: bool,
    pub due: usize,
    pub claimed: usize,
    pub lost: usize,
    pub reclaimed: usize,
    pub exhausted: usize,
    pub sent: usize,
    pub failed: usize,
    pub superseded: usize,
}

impl TickReport {
    /// Nothing happened
    pub fn is_idle(&self) -> bool {
        self.due == 0 && self.reclaimed == 0 && self.exhausted == 0
    }

    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Sent { .. } => self.sent += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::Superseded => self.superseded += 1,
        }
    }
}

/// Resets the in-progress flag when a tick ends, even on early return
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Polls the job store and executes due jobs
pub struct Poller {
    jobs: Arc<dyn JobRepository>,
    executor: JobExecutor,
    config: SchedulerConfig,
    worker_id: String,
    tick_in_progress: AtomicBool,
    running: AtomicBool,
}

impl Poller {
    pub fn new(jobs: Arc<dyn JobRepository>, executor: JobExecutor, config: SchedulerConfig) -> Self {
        Self {
            jobs,
            executor: executor.with_lease_secs(config.lease_secs),
            config,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            tick_in_progress: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn lease_at(&self, now: DateTime<Utc>, duration: ChronoDuration) -> Lease {
        Lease::new(self.worker_id.clone(), now.max(Utc::now()), duration)
    }

    /// Size the lease of a taken-over job to its run; `false` if it moved on
    fn resize_lease(&self, job: &ScheduledJob, now: DateTime<Utc>) -> bool {
        let lease = self.lease_at(now, self.executor.lease_for(job));
        match self.jobs.extend_lease(&job.id, &self.worker_id, lease.expires_at()) {
            Ok(owned) => owned,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to resize lease");
                true
            }
        }
    }

    /// Run one tick against the current time
    pub async fn tick(&self) -> SchedulerResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick treating `now` as the current time
    pub async fn tick_at(&self, now: DateTime<Utc>) -> SchedulerResult<TickReport> {
        if self
            .tick_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(worker_id = %self.worker_id, "Previous tick still running, skipping");
            return Ok(TickReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = TickGuard(&self.tick_in_progress);
        let _timer = metrics::start_tick_timer();

        let mut report = TickReport::default();

        let base = self.lease_at(now, self.executor.base_lease());
        let sweep = self
            .jobs
            .reclaim_expired(&base, self.config.max_attempts)
            .map_err(|e| SchedulerError::store("reclaim_expired", &e))?;

        report.reclaimed = sweep.reclaimed.len();
        report.exhausted = sweep.exhausted.len();
        metrics::record_leases_reclaimed(sweep.reclaimed.len());
        for id in &sweep.exhausted {
            metrics::record_job_outcome(false);
            tracing::warn!(job_id = %id, "Job failed after exhausting lease attempts");
        }
        for job in &sweep.reclaimed {
            tracing::info!(job_id = %job.id, attempt = job.attempts, "Took over expired lease");
            if !self.resize_lease(job, now) {
                report.record(&JobOutcome::Superseded);
                continue;
            }
            let outcome = self.executor.execute(job, &self.worker_id).await;
            report.record(&outcome);
        }

        let due = self
            .jobs
            .fetch_due(now, self.config.batch_size)
            .map_err(|e| SchedulerError::store("fetch_due", &e))?;
        report.due = due.len();

        for job in due {
            self.claim_and_execute(job, now, &mut report).await;
        }

        Ok(report)
    }

    async fn claim_and_execute(&self, job: ScheduledJob, now: DateTime<Utc>, report: &mut TickReport) {
        let lease = self.lease_at(now, self.executor.lease_for(&job));
        match self.jobs.claim(&job.id, &lease) {
            Ok(ClaimOutcome::Claimed) => {
                report.claimed += 1;
                metrics::record_job_claimed();
                let job = ScheduledJob {
                    attempts: job.attempts + 1,
                    claimed_by: Some(lease.worker_id.clone()),
                    claimed_at: Some(lease.now),
                    lease_expires_at: Some(lease.expires_at()),
                    ..job
                };
                let outcome = self.executor.execute(&job, &self.worker_id).await;
                report.record(&outcome);
            }
            Ok(ClaimOutcome::Lost) => {
                report.lost += 1;
                metrics::record_claim_lost();
                tracing::debug!(job_id = %job.id, "Claim lost to another worker");
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Claim attempt failed");
            }
        }
    }

    /// Tick on the configured interval until `shutdown` turns true
    ///
    /// An in-flight tick always finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            worker_id = %self.worker_id,
            interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            "Poller started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.is_idle() => {}
                        Ok(report) => tracing::info!(
                            due = report.due,
                            claimed = report.claimed,
                            lost = report.lost,
                            reclaimed = report.reclaimed,
                            sent = report.sent,
                            failed = report.failed,
                            "Poll tick finished"
                        ),
                        Err(e) if e.is_recoverable() => {
                            tracing::warn!(error = %e, "Poll tick failed, will retry next tick");
                        }
                        Err(e) => tracing::error!(error = %e, "Poll tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        tracing::info!(worker_id = %self.worker_id, "Poller stopped");
        Ok(())
    }
}
