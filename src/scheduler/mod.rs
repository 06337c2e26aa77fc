//! Scheduled quiz delivery
//!
//! Jobs are persisted with a due instant and picked up by one or more
//! pollers. The only coordination between pollers is a single-row
//! conditional update on the job's status, extended with a lease so a
//! crashed worker's job can be taken over.
//!
//! # Architecture
//!
//! ```text
//!   JobBook::schedule ──▶ scheduled_jobs (pending)
//!                                │
//!              ┌─────────────────┼─────────────────┐
//!              ▼                 ▼                 ▼
//!          Poller A          Poller B          Poller C
//!              │   UPDATE ... WHERE status='pending'
//!              │   (exactly one wins; the rest skip)
//!              ▼
//!         JobExecutor ──▶ generate ──▶ deliver ──▶ sent | failed
//! ```
//!
//! # Job lifecycle
//!
//! `pending → processing → {sent, failed}`. A lease takeover keeps the job
//! in `processing` and only changes its owner; after `max_attempts` claims
//! the sweep marks it `failed`. Nothing ever returns to `pending`.
//!
//! # Modules
//!
//! - [`jobs`] - Schedule time parsing, job creation, listing and deletion
//! - [`poller`] - Interval loop, lease sweep and atomic claims
//! - [`executor`] - Generation and delivery of a claimed job
//! - [`error`] - Scheduler error types

pub mod error;
pub mod executor;
pub mod jobs;
pub mod poller;

pub use error::{SchedulerError, SchedulerResult};
pub use executor::{JobExecutor, JobOutcome};
pub use jobs::{parse_schedule_time, JobBook, SCHEDULE_TIME_FORMAT};
pub use poller::{Poller, TickReport};
