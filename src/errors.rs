//! Typed error hierarchy for topomap.
//!
//! Three enums cover the three layers a request passes through:
//! - `TrackerError`: long-poll failures local to one `wait` call
//! - `JobError`: worker launch and exit failures
//! - `ValidationError`: rejected job requests

use thiserror::Error;

/// Message surfaced when a worker exits non-zero without reporting an error.
pub const DEFAULT_JOB_ERROR: &str = "Internal error while creating the map";

/// Errors from a single `ProgressTracker::wait` call.
///
/// None of these mutate tracker state: the run, if any, stays registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("Already waiting for progress")]
    AlreadyWaiting,

    #[error("Missing progress run")]
    MissingRun,

    #[error("Timeout waiting for progress")]
    WaitTimeout,
}

/// Errors from running one worker process.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to launch worker '{program}': {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker failed: {message}")]
    JobFailed {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job queue is closed")]
    QueueClosed,
}

impl JobError {
    /// Text suitable for a client-facing `error` field.
    pub fn user_message(&self) -> &str {
        match self {
            JobError::JobFailed { message, .. } => message,
            JobError::LaunchFailed { .. } | JobError::Io(_) | JobError::QueueClosed => {
                DEFAULT_JOB_ERROR
            }
        }
    }
}

/// A job request that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Malformed request body: {0}")]
    Malformed(String),
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
