//! Persistence for users, scheduled jobs and quizzes
//!
//! SQLite (bundled, WAL mode) stores everything. Several processes may open
//! the same database file; job transitions stay safe because each one is a
//! conditional update.

pub mod repository;
pub mod sqlite;

pub use repository::{
    ClaimOutcome, JobRepository, Lease, LeaseSweep, QuizRepository, UserRepository,
};
pub use sqlite::SqliteStore;
