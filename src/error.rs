//! Unified error handling for the quizline crate
//!
//! Domain-specific errors live next to the code that raises them; this module
//! consolidates them into a single `Error` enum for the orchestrator and
//! binary, while keeping the originals available for fine-grained matching.
//!
//! # Architecture
//!
//! - [`QuizErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! Quota and cooldown refusals are not errors: they are reported through
//! [`crate::quota::GateDecision`]. A lost job claim is not an error either.

use std::io;
use thiserror::Error;

pub use crate::content::ContentError;
pub use crate::delivery::DeliveryError;
pub use crate::scheduler::error::SchedulerError;

/// Common trait for all quizline error types
pub trait QuizErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a retry may succeed)
    fn is_recoverable(&self) -> bool;

    /// Corrective message suitable for the end user
    fn user_message(&self) -> String;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad or empty user input
    Validation,
    /// AI generation produced nothing usable
    Generation,
    /// Sending to a destination failed
    Delivery,
    /// Storage and I/O errors
    Storage,
    /// Configuration errors
    Config,
    /// Scheduler and job errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Generation => "generation",
            Self::Delivery => "delivery",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the quizline crate
#[derive(Error, Debug)]
pub enum Error {
    /// Content could not be turned into a generation descriptor
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    /// Malformed user input (schedule time, count, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Every generation call returned zero usable items
    #[error("No questions could be generated from {chunks} chunk(s)")]
    GenerationEmpty { chunks: usize },

    /// Delivery failed
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Scheduler and job errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl QuizErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Content(e) => e.is_recoverable(),
            Self::Validation(_) => false,
            Self::GenerationEmpty { .. } => true,
            Self::Delivery(e) => e.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Database(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::Content(e) => e.user_message(),
            Self::Validation(msg) => msg.clone(),
            Self::GenerationEmpty { .. } => {
                "An error occurred while generating questions (or none returned). Please try again."
                    .to_string()
            }
            Self::Delivery(_) => "Could not post the questions to the destination.".to_string(),
            Self::Scheduler(e) => e.to_string(),
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Other { .. } => {
                "Something went wrong. Please try again later.".to_string()
            }
            Self::Config(_) => "The service is misconfigured.".to_string(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Content(_) | Self::Validation(_) => ErrorCategory::Validation,
            Self::Scheduler(SchedulerError::InvalidScheduleTime { .. }) => ErrorCategory::Validation,
            Self::GenerationEmpty { .. } => ErrorCategory::Generation,
            Self::Delivery(_) => ErrorCategory::Delivery,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
