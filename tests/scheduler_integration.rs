//! Integration tests for scheduled delivery
//!
//! These tests verify:
//! - At-most-once execution when several pollers share one database
//! - Due-time handling across poll ticks
//! - Terminal failure when generation yields nothing
//! - Lease takeover after a worker disappears
//! - Lease renewal while a slow delivery is still running

mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use common::{create_executor, CountingGenerator, RecordingSender};
use quizline::config::SchedulerConfig;
use quizline::delivery::{DeliveryResult, MessageSender, PollMessage};
use quizline::models::{Destination, GenerationRequest, JobStatus, RenderFormat, ScheduledJob};
use quizline::scheduler::{JobBook, Poller};
use quizline::storage::{JobRepository, Lease, QuizRepository, SqliteStore};

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_secs: 5,
        batch_size: 10,
        lease_secs: 60,
        max_attempts: 2,
    }
}

fn shared_db() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");
    (dir, path)
}

fn new_job(owner: i64, at: chrono::DateTime<Utc>) -> ScheduledJob {
    ScheduledJob::from_request(
        GenerationRequest::note(owner, "The water cycle: evaporation, condensation, precipitation")
            .with_count(3),
        Destination::new(-100200, "Science Channel"),
        RenderFormat::Text,
        5,
        at,
    )
}

// ============================================================================
// Claim Race
// ============================================================================

#[test]
fn test_claim_race_across_connections() {
    let (_dir, path) = shared_db();
    let first = SqliteStore::new(&path).unwrap();
    let second = SqliteStore::new(&path).unwrap();

    let now = Utc::now();
    let job = new_job(1, now);
    first.insert_job(&job).unwrap();

    let a = first
        .claim(&job.id, &Lease::new("worker-a", now, Duration::seconds(60)))
        .unwrap();
    let b = second
        .claim(&job.id, &Lease::new("worker-b", now, Duration::seconds(60)))
        .unwrap();

    assert!(a.is_claimed() ^ b.is_claimed(), "exactly one claim must win");
    let stored = second.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
    assert_eq!(stored.claimed_by.as_deref(), Some("worker-a"));
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn test_two_pollers_deliver_once() {
    let (_dir, path) = shared_db();
    let store_a = Arc::new(SqliteStore::new(&path).unwrap());
    let store_b = Arc::new(SqliteStore::new(&path).unwrap());
    let sender = Arc::new(RecordingSender::default());
    let generator = Arc::new(CountingGenerator::new(3));

    let now = Utc::now();
    let job = new_job(7, now - Duration::seconds(1));
    store_a.insert_job(&job).unwrap();

    let poller_a = Poller::new(
        store_a.clone(),
        create_executor(store_a.clone(), generator.clone(), sender.clone()),
        scheduler_config(),
    )
    .with_worker_id("a");
    let poller_b = Poller::new(
        store_b.clone(),
        create_executor(store_b.clone(), generator.clone(), sender.clone()),
        scheduler_config(),
    )
    .with_worker_id("b");

    let (ra, rb) = tokio::join!(poller_a.tick_at(now), poller_b.tick_at(now));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.claimed + rb.claimed, 1);
    assert_eq!(ra.sent + rb.sent, 1);
    assert_eq!(sender.count_to(-100200), 3);
    assert_eq!(generator.calls(), 1);
    assert_eq!(store_a.get_job(&job.id).unwrap().unwrap().status, JobStatus::Sent);
}

// ============================================================================
// Due Time
// ============================================================================

#[tokio::test]
async fn test_job_waits_until_due_then_runs_once() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let sender = Arc::new(RecordingSender::default());
    let generator = Arc::new(CountingGenerator::new(5));
    let poller = Poller::new(
        store.clone(),
        create_executor(store.clone(), generator.clone(), sender.clone()),
        scheduler_config(),
    );

    let t = Utc::now();
    let job = new_job(3, t + Duration::hours(1));
    store.insert_job(&job).unwrap();

    for minutes in [0, 5, 30, 59] {
        let report = poller.tick_at(t + Duration::minutes(minutes)).await.unwrap();
        assert_eq!(report.due, 0);
        assert_eq!(store.get_job(&job.id).unwrap().unwrap().status, JobStatus::Pending);
    }

    let due_at = t + Duration::hours(1);
    let first = poller.tick_at(due_at).await.unwrap();
    let second = poller.tick_at(due_at + Duration::seconds(1)).await.unwrap();

    assert_eq!((first.claimed, first.sent), (1, 1));
    assert_eq!(second.due, 0);
    assert_eq!(generator.calls(), 1);
    assert_eq!(sender.count_to(-100200), 3);
    assert_eq!(store.get_job(&job.id).unwrap().unwrap().status, JobStatus::Sent);
    // owner summary
    assert_eq!(sender.count_to(3), 1);
}

#[tokio::test]
async fn test_job_book_schedule_then_poll() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let sender = Arc::new(RecordingSender::default());
    let book = JobBook::new(store.clone(), 3);
    let job = book
        .schedule(
            GenerationRequest::title(11, "Photosynthesis").with_count(2),
            Destination::direct(11),
            RenderFormat::Poll,
            5,
            "2030-01-01 09:00",
        )
        .unwrap();

    let poller = Poller::new(
        store.clone(),
        create_executor(store.clone(), Arc::new(CountingGenerator::new(2)), sender.clone()),
        scheduler_config(),
    );
    let report = poller.tick_at(job.scheduled_at).await.unwrap();
    assert_eq!(report.sent, 1);

    let quizzes = store.list_quizzes_for_owner(11, 10).unwrap();
    assert_eq!(quizzes.len(), 1);
    assert_eq!(quizzes[0].title, "Photosynthesis");
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_zero_items_marks_job_failed() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let sender = Arc::new(RecordingSender::default());
    let poller = Poller::new(
        store.clone(),
        create_executor(store.clone(), Arc::new(CountingGenerator::new(0)), sender.clone()),
        scheduler_config(),
    );

    let now = Utc::now();
    let job = new_job(4, now);
    store.insert_job(&job).unwrap();

    let report = poller.tick_at(now).await.unwrap();
    assert_eq!((report.claimed, report.failed, report.sent), (1, 1, 0));

    let stored = store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.status.is_terminal());
    assert!(sender.messages.lock().unwrap().is_empty());
    assert!(store.list_quizzes_for_owner(4, 10).unwrap().is_empty());

    // terminal: never picked up again
    let again = poller.tick_at(now + Duration::minutes(10)).await.unwrap();
    assert!(again.is_idle());
}

#[tokio::test]
async fn test_expired_lease_taken_over_by_another_poller() {
    let (_dir, path) = shared_db();
    let store_a = Arc::new(SqliteStore::new(&path).unwrap());
    let store_b = Arc::new(SqliteStore::new(&path).unwrap());
    let sender = Arc::new(RecordingSender::default());

    let now = Utc::now();
    let job = new_job(5, now);
    store_a.insert_job(&job).unwrap();

    // worker "crashed" right after claiming
    assert!(store_a
        .claim(&job.id, &Lease::new("crashed", now, Duration::seconds(60)))
        .unwrap()
        .is_claimed());

    let poller_b = Poller::new(
        store_b.clone(),
        create_executor(store_b.clone(), Arc::new(CountingGenerator::new(3)), sender.clone()),
        scheduler_config(),
    )
    .with_worker_id("b");

    let early = poller_b.tick_at(now + Duration::seconds(30)).await.unwrap();
    assert_eq!(early.reclaimed, 0);

    let late = poller_b.tick_at(now + Duration::seconds(61)).await.unwrap();
    assert_eq!((late.reclaimed, late.sent), (1, 1));

    let stored = store_a.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Sent);
    assert_eq!(stored.claimed_by.as_deref(), Some("b"));
    assert_eq!(stored.attempts, 2);

    // the crashed worker can no longer complete it
    assert!(!store_a.mark_failed(&job.id, "crashed", "late").unwrap());
}

#[tokio::test]
async fn test_lease_exhaustion_fails_job() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let now = Utc::now();
    let job = new_job(6, now);
    store.insert_job(&job).unwrap();

    // first claim, then a takeover that also "crashes": two attempts used
    assert!(store
        .claim(&job.id, &Lease::new("w1", now, Duration::seconds(60)))
        .unwrap()
        .is_claimed());
    let sweep = store
        .reclaim_expired(&Lease::new("w2", now + Duration::seconds(61), Duration::seconds(60)), 2)
        .unwrap();
    assert_eq!(sweep.reclaimed.len(), 1);

    let poller = Poller::new(
        store.clone(),
        create_executor(
            store.clone(),
            Arc::new(CountingGenerator::new(3)),
            Arc::new(RecordingSender::default()),
        ),
        scheduler_config(),
    );
    let report = poller.tick_at(now + Duration::seconds(200)).await.unwrap();
    assert_eq!(report.exhausted, 1);

    let stored = store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error_message.unwrap().contains("2 attempt"));
}

// ============================================================================
// Lease Renewal
// ============================================================================

/// Records messages after a fixed delay, like a rate-limited chat API
struct SlowSender {
    delay: std::time::Duration,
    inner: RecordingSender,
}

#[async_trait]
impl MessageSender for SlowSender {
    fn name(&self) -> &str {
        "slow"
    }

    async fn send_text(&self, destination: &Destination, html: &str) -> DeliveryResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.send_text(destination, html).await
    }

    async fn send_poll(&self, destination: &Destination, poll: &PollMessage) -> DeliveryResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.send_poll(destination, poll).await
    }
}

#[tokio::test]
async fn test_delivery_outlasting_lease_is_not_taken_over() {
    let (_dir, path) = shared_db();
    let store_a = Arc::new(SqliteStore::new(&path).unwrap());
    let store_b = Arc::new(SqliteStore::new(&path).unwrap());
    let sender = Arc::new(SlowSender {
        delay: std::time::Duration::from_millis(700),
        inner: RecordingSender::default(),
    });
    let generator = Arc::new(CountingGenerator::new(3));
    let config = SchedulerConfig {
        lease_secs: 1,
        ..scheduler_config()
    };

    let job = new_job(8, Utc::now() - Duration::seconds(1));
    store_a.insert_job(&job).unwrap();

    let poller_a = Poller::new(
        store_a.clone(),
        create_executor(store_a.clone(), generator.clone(), sender.clone()),
        config.clone(),
    )
    .with_worker_id("a");
    let poller_b = Poller::new(
        store_b.clone(),
        create_executor(store_b.clone(), generator.clone(), sender.clone()),
        config,
    )
    .with_worker_id("b");

    // three sends take 2.1s against a 1s lease; B looks in halfway through
    let late_b = async {
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        poller_b.tick().await
    };
    let (ra, rb) = tokio::join!(poller_a.tick(), late_b);
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!((ra.claimed, ra.sent, ra.superseded), (1, 1, 0));
    assert!(rb.is_idle());
    assert_eq!(rb.sent, 0);
    assert_eq!(sender.inner.count_to(-100200), 3);
    assert_eq!(generator.calls(), 1);

    let stored = store_b.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Sent);
    assert_eq!(stored.claimed_by.as_deref(), Some("a"));
    assert_eq!(stored.attempts, 1);
    assert_eq!(store_b.list_quizzes_for_owner(8, 10).unwrap().len(), 1);
}
