//! Run-request status and its state machine.
//!
//! Discriminants match the seed data order (1-based) of the
//! `run_request_statuses` lookup table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Lifecycle of a run request, owned by the dispatcher.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Created = 1,
    Retrying = 2,
    Running = 3,
    Success = 4,
    Failed = 5,
    FailedToStart = 6,
}

/// Statuses after which a run request is never mutated again.
pub const TERMINAL_STATUSES: [RunStatus; 3] = [
    RunStatus::Success,
    RunStatus::Failed,
    RunStatus::FailedToStart,
];

impl RunStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a database status ID back to the enum.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Created),
            2 => Some(Self::Retrying),
            3 => Some(Self::Running),
            4 => Some(Self::Success),
            5 => Some(Self::Failed),
            6 => Some(Self::FailedToStart),
            _ => None,
        }
    }

    /// Name as stored in the lookup table and shown to pollers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Retrying => "RETRYING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::FailedToStart => "FAILED_TO_START",
        }
    }

    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }

    /// Returns the set of statuses reachable from `self`.
    ///
    /// Terminal states return an empty slice.
    pub fn valid_transitions(self) -> &'static [RunStatus] {
        use RunStatus::*;
        match self {
            // Busy -> Retrying, exhausted -> FailedToStart, acquired -> Running
            Created | Retrying => &[Retrying, FailedToStart, Running],
            Running => &[Success, Failed],
            Success | Failed | FailedToStart => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(self, to: RunStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(self, to: RunStatus) -> Result<(), String> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(format!(
                "Invalid transition: {} ({}) -> {} ({})",
                self,
                self.id(),
                to,
                to.id()
            ))
        }
    }
}

impl From<RunStatus> for StatusId {
    fn from(value: RunStatus) -> Self {
        value as StatusId
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RunStatus; 6] = [
        RunStatus::Created,
        RunStatus::Retrying,
        RunStatus::Running,
        RunStatus::Success,
        RunStatus::Failed,
        RunStatus::FailedToStart,
    ];

    #[test]
    fn status_ids_match_seed_data() {
        assert_eq!(RunStatus::Created.id(), 1);
        assert_eq!(RunStatus::Retrying.id(), 2);
        assert_eq!(RunStatus::Running.id(), 3);
        assert_eq!(RunStatus::Success.id(), 4);
        assert_eq!(RunStatus::Failed.id(), 5);
        assert_eq!(RunStatus::FailedToStart.id(), 6);
    }

    #[test]
    fn from_id_inverts_id() {
        for status in ALL {
            assert_eq!(RunStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(RunStatus::from_id(0), None);
        assert_eq!(RunStatus::from_id(7), None);
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in TERMINAL_STATUSES {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn created_and_retrying_share_transitions() {
        assert_eq!(
            RunStatus::Created.valid_transitions(),
            RunStatus::Retrying.valid_transitions()
        );
        assert!(RunStatus::Retrying.can_transition(RunStatus::Retrying));
    }

    #[test]
    fn running_only_reaches_success_or_failed() {
        assert!(RunStatus::Running.can_transition(RunStatus::Success));
        assert!(RunStatus::Running.can_transition(RunStatus::Failed));
        assert!(!RunStatus::Running.can_transition(RunStatus::FailedToStart));
        assert!(!RunStatus::Running.can_transition(RunStatus::Retrying));
    }

    #[test]
    fn cannot_skip_running() {
        assert!(!RunStatus::Created.can_transition(RunStatus::Success));
        assert!(!RunStatus::Created.can_transition(RunStatus::Failed));
    }

    #[test]
    fn validate_transition_message() {
        let err = RunStatus::Success
            .validate_transition(RunStatus::Running)
            .unwrap_err();
        assert_eq!(err, "Invalid transition: SUCCESS (4) -> RUNNING (3)");
        assert!(RunStatus::Created
            .validate_transition(RunStatus::Running)
            .is_ok());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&RunStatus::FailedToStart).unwrap();
        assert_eq!(json, "\"FAILED_TO_START\"");
    }
}
