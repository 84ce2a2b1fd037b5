//! Domain-level error taxonomy for ACCEPT.

use accept_state::StorageError;

use crate::build::BuildError;
use crate::config::ConfigError;
use crate::scheduler::SchedulerError;
use crate::uncertain::UncertainError;

/// ACCEPT errors.
///
/// Measurement failures (timeouts, crashes, bad output) are never errors;
/// they are recorded in [`crate::domain::Execution`] and classified later.
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    /// Actionable problem with the user's program directory.
    #[error("{0}")]
    User(String),

    #[error("precise execution failed: {reason}")]
    PreciseExecutionFailed { reason: String, log: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("statistics error: {0}")]
    Uncertain(#[from] UncertainError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcceptError {
    /// Errors the user can fix in their program directory; reported without
    /// internal detail.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AcceptError::User(_) | AcceptError::PreciseExecutionFailed { .. }
        )
    }

    /// Captured build/run log attached to the error, if any.
    pub fn log(&self) -> Option<&str> {
        match self {
            AcceptError::PreciseExecutionFailed { log, .. } => Some(log),
            AcceptError::Build(e) => e.log(),
            _ => None,
        }
    }
}

/// Result type for ACCEPT operations.
pub type Result<T> = std::result::Result<T, AcceptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_are_flagged() {
        assert!(AcceptError::User("no accept_eval script".into()).is_user_error());
        let err = AcceptError::PreciseExecutionFailed {
            reason: "exit status 2".into(),
            log: "segfault".into(),
        };
        assert!(err.is_user_error());
        assert_eq!(err.log(), Some("segfault"));
        assert!(err.to_string().contains("precise execution failed"));
    }

    #[test]
    fn wrapped_errors_are_not_user_errors() {
        let err: AcceptError = UncertainError::EmptyInput.into();
        assert!(!err.is_user_error());
        assert!(err.to_string().contains("empty"));
    }
}
