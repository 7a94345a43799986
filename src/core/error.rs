//! Error taxonomy for a job run.
//!
//! Every failure inside a run is converted into exactly one [`RunOutcome`]
//! at the controller boundary; nothing here escapes the worker task.

use std::time::Duration;

use thiserror::Error;

use super::models::RunOutcome;

/// Caller-correctable input problems, reported before any backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid farm ID {0:?}: expected farm-<hex>")]
    FarmId(String),

    #[error("invalid queue ID {0:?}: expected queue-<hex>")]
    QueueId(String),
}

/// Transport or process failure talking to the job-management service.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("`{0}` not found; is the Deadline CLI installed and on PATH?")]
    NotInstalled(String),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code}: {stderr}")]
    Exit {
        command: String,
        code: String,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// The backend rejected the submission. Never retried.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("could not extract job ID from output: {0}")]
    MissingJobId(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("submission failed: {0}")]
    Submission(#[from] SubmissionError),

    #[error("status check failed: {0}")]
    StatusCheck(#[source] BackendError),

    #[error("job failed")]
    JobFailed { raw_status: String },

    #[error("log retrieval failed: {0}")]
    LogRetrieval(#[source] BackendError),

    #[error("job did not finish within {0:?}")]
    TimeoutExceeded(Duration),

    #[error("no software packages found")]
    EmptyResult,
}

impl From<RunError> for RunOutcome {
    fn from(err: RunError) -> Self {
        match err {
            RunError::TimeoutExceeded(_) => RunOutcome::Timeout,
            other => RunOutcome::Failure(other.to_string()),
        }
    }
}
