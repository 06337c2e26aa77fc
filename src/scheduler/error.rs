//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Schedule time not in `YYYY-MM-DD HH:MM` form or not representable
    InvalidScheduleTime {
        input: String,
    },

    /// No job with this id belongs to the caller
    JobNotFound {
        id: String,
    },

    /// Job is being executed and cannot be changed
    JobInProgress {
        id: String,
    },

    /// Job store operation failed
    StoreError {
        operation: String,
        reason: String,
    },

    /// Poller was asked to start twice
    AlreadyRunning,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidScheduleTime { input } => {
                write!(f, "Invalid format '{}'. Use YYYY-MM-DD HH:MM", input)
            }
            Self::JobNotFound { id } => {
                write!(f, "Scheduled job not found: {}", id)
            }
            Self::JobInProgress { id } => {
                write!(f, "Scheduled job {} is being processed and cannot be deleted", id)
            }
            Self::StoreError { operation, reason } => {
                write!(f, "Job store error during '{}': {}", operation, reason)
            }
            Self::AlreadyRunning => {
                write!(f, "Poller is already running")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        Self::StoreError {
            operation: "unknown".to_string(),
            reason: format!("{err:#}"),
        }
    }
}

impl SchedulerError {
    /// Create an invalid schedule time error
    pub fn invalid_time(input: impl Into<String>) -> Self {
        Self::InvalidScheduleTime {
            input: input.into(),
        }
    }

    /// Create a job not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound { id: id.into() }
    }

    /// Create a store error with the failing operation
    pub fn store(operation: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::StoreError {
            operation: operation.into(),
            reason: format!("{err:#}"),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StoreError { .. })
    }
}
