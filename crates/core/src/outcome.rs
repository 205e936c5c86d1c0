//! Tagged result of one process execution under a held environment lock.

use std::time::Duration;

use crate::error::DispatchError;
use crate::process::{ProcessError, ProcessOutput};
use crate::run_status::RunStatus;

/// Everything that can come out of the "run the tests" step.
///
/// Produced for every attempt that acquired the lock, including when
/// spawning fails or the execution step panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success { output: String },
    NonZeroExit { exit_code: i32, output: String },
    Timeout { after: Duration },
    Fault { message: String },
}

impl RunOutcome {
    /// Classify a process runner result.
    pub fn from_process(result: Result<ProcessOutput, ProcessError>) -> Self {
        match result {
            Ok(out) if out.exit_code == 0 => Self::Success { output: out.output },
            Ok(out) => Self::NonZeroExit {
                exit_code: out.exit_code,
                output: out.output,
            },
            Err(ProcessError::Timeout { timeout }) => Self::Timeout { after: timeout },
            Err(e) => Self::Fault {
                message: e.to_string(),
            },
        }
    }

    /// Terminal status this outcome leads to.
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Success { .. } => RunStatus::Success,
            Self::NonZeroExit { .. } | Self::Timeout { .. } | Self::Fault { .. } => {
                RunStatus::Failed
            }
        }
    }

    /// Log text persisted on the run request for this outcome.
    pub fn log_text(&self, environment: &str) -> String {
        match self {
            Self::Success { output } | Self::NonZeroExit { output, .. } => output.clone(),
            Self::Timeout { .. } => {
                format!("Timeout occurred while running tests on env {environment}")
            }
            Self::Fault { message } => {
                format!("Error occurred while running tests on env {environment}: {message}")
            }
        }
    }

    /// The failure taxonomy entry, or `None` for success.
    pub fn error(&self, environment: &str) -> Option<DispatchError> {
        match self {
            Self::Success { .. } => None,
            Self::NonZeroExit { exit_code, .. } => Some(DispatchError::ProcessExitNonZero {
                exit_code: *exit_code,
            }),
            Self::Timeout { after } => Some(DispatchError::ProcessTimeout {
                environment: environment.to_string(),
                timeout: *after,
            }),
            Self::Fault { message } => Some(DispatchError::UnexpectedFault(message.clone())),
        }
    }
}
