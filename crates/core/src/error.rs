use std::time::Duration;

use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a dispatch attempt did not end in `SUCCESS`.
///
/// None of these escape [`Dispatcher::dispatch`](crate::dispatcher::Dispatcher::dispatch);
/// each is converted into a persisted status plus a log message and carried
/// on the returned report for the caller's tracing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Recoverable: another attempt holds the environment.
    #[error("Environment {environment} is busy")]
    EnvironmentBusy { environment: String },

    /// Terminal (`FAILED_TO_START`). No lock was held when this was decided.
    #[error("Environment {environment} still busy after {attempts} attempts")]
    RetriesExhausted { environment: String, attempts: u32 },

    /// Terminal (`FAILED`). The child process was killed.
    #[error("Test run on {environment} exceeded {}s timeout", timeout.as_secs())]
    ProcessTimeout {
        environment: String,
        timeout: Duration,
    },

    /// Terminal (`FAILED`).
    #[error("Test process exited with code {exit_code}")]
    ProcessExitNonZero { exit_code: i32 },

    /// Terminal (`FAILED`): spawn failure, I/O fault, panic, store fault.
    #[error("Unexpected fault: {0}")]
    UnexpectedFault(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = CoreError::NotFound {
            entity: "RunRequest",
            id: 7,
        };
        assert_eq!(err.to_string(), "Entity not found: RunRequest with id 7");
    }

    #[test]
    fn display_timeout() {
        let err = DispatchError::ProcessTimeout {
            environment: "envA".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Test run on envA exceeded 30s timeout");
    }

    #[test]
    fn display_retries_exhausted() {
        let err = DispatchError::RetriesExhausted {
            environment: "envA".to_string(),
            attempts: 11,
        };
        assert_eq!(
            err.to_string(),
            "Environment envA still busy after 11 attempts"
        );
    }
}
