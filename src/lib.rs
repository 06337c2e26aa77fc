//! quizline - quiz generation and delivery pipeline
//!
//! Turns study material (a note, a bare title, file text, a video transcript
//! or audio) into validated multiple-choice items through an AI generation
//! service, then delivers them to a chat destination either immediately or
//! at a scheduled instant, under per-user quota and cooldown limits.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`content`] - Normalization of the five source kinds
//! - [`quota`] - Daily quota and submission cooldown gate
//! - [`generation`] - Chunking, AI client and response validation
//! - [`delivery`] - Rendering and paced sending to destinations
//! - [`scheduler`] - Persisted jobs, atomic claims and the poller
//! - [`pipeline`] - The immediate "deliver now" path
//! - [`storage`] - SQLite repositories for users, jobs and quizzes
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus counters
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use quizline::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);
//!     let generator = Arc::new(GeminiClient::new(config.generation.clone())?);
//!     let delivery = DeliveryEngine::new(Arc::new(ConsoleSender), store.clone(), store.clone());
//!     let orchestrator = QuizOrchestrator::new(
//!         ContentNormalizer::default(),
//!         QuotaGate::new(store.clone(), config.quota.clone()),
//!         generator,
//!         delivery,
//!         store,
//!         config.generation.max_chunk_chars,
//!     );
//!     let submission = QuizSubmission::new(42, SourceInput::Title("Photosynthesis".into()));
//!     orchestrator.deliver_now(submission, CancelSignal::never()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod content;
pub mod delivery;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod quota;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::content::{ContentNormalizer, SourceInput, UploadedFile};
    pub use crate::delivery::{
        BotApiSender, CancelSignal, ConsoleSender, DeliveryEngine, MessageSender, Pacing,
    };
    pub use crate::error::{Error, ErrorCategory, QuizErrorTrait, Result};
    pub use crate::generation::{GeminiClient, QuestionGenerator};
    pub use crate::models::{Destination, Difficulty, GeneratedItem, RenderFormat, ScheduledJob};
    pub use crate::pipeline::{QuizOrchestrator, QuizSubmission, SubmitOutcome};
    pub use crate::quota::QuotaGate;
    pub use crate::scheduler::{JobBook, JobExecutor, Poller};
    pub use crate::storage::SqliteStore;
}

// Direct re-exports for convenience
pub use models::{GeneratedItem, JobStatus, Quiz, ScheduledJob};
