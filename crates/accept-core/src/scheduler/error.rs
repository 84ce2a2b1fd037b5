//! Scheduler error types.

use accept_state::StorageError;

/// Errors surfaced by [`super::JobScheduler`].
///
/// Build and run failures of the target program are not scheduler errors;
/// they are part of the job's returned value.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `get` for a key that was never submitted and is not memoized.
    #[error("no job or result for {key}")]
    NotFound { key: String },

    /// The job itself raised (or panicked).
    #[error("job {key} failed: {message}")]
    JobFailed { key: String, message: String },

    #[error("memo store error: {0}")]
    Storage(#[from] StorageError),

    #[error("could not encode job result: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The worker pool shut down before the job could be dispatched.
    #[error("scheduler is closed")]
    Closed,
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
