use std::io;

use crate::table::JobId;

/// Errors returned by the job-control core.
///
/// Every fallible operation in this crate returns one of these variants
/// rather than a bare `io::Error`; the kinds mirror the sentinel values the
/// underlying assignment returns as `-1`, given names so callers can match
/// on *why* an operation failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// `init()` was never called, or `fini()` already ran.
    #[error("job control is not initialized")]
    NotInitialized,

    /// The pipeline handed to `run` has no commands.
    #[error("pipeline has no commands")]
    InvalidPipeline,

    /// `fork()` of the pipeline leader failed.
    #[error("failed to fork pipeline leader: {0}")]
    ForkFailed(#[source] io::Error),

    /// No job with this id exists in the table.
    #[error("no such job: {0}")]
    NoSuchJob(JobId),

    /// The job exists but has not reached a terminal status.
    #[error("job {0} has not terminated")]
    NotTerminated(JobId),

    /// `cancel` was called a second time on the same job.
    #[error("job {0} was already cancelled")]
    AlreadyCancelled(JobId),

    /// A system call other than fork failed during launch or teardown.
    #[error("system call failed: {0}")]
    SystemCallFailed(#[source] io::Error),

    /// `get_output` was called on a job with no capture pipe.
    #[error("job {0} has no captured output")]
    CaptureUnavailable(JobId),
}

pub type Result<T> = std::result::Result<T, JobError>;
