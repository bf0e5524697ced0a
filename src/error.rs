use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionState;

/// Session lifecycle calls a caller may issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    BeginCountdown,
    Start,
    Cancel,
    Pause,
    Resume,
    Stop,
    Reset,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Transition::BeginCountdown => "begin_countdown",
            Transition::Start => "start",
            Transition::Cancel => "cancel",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Stop => "stop",
            Transition::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Run tracker error types
///
/// Sample-level problems (poor accuracy, teleports, jitter) never show up
/// here; the filter absorbs them and only counts them.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("cannot {action} while {from:?}")]
    InvalidTransition {
        from: SessionState,
        action: Transition,
    },

    #[error("Snapshot write failed for {session_id}: {reason}")]
    SnapshotWriteFailed { session_id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// True for errors that leave the live session untouched
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TrackerError::InvalidConfig(_))
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = TrackerError::InvalidTransition {
            from: SessionState::Tracking,
            action: Transition::Resume,
        };
        assert_eq!(err.to_string(), "cannot resume while Tracking");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_config_error_not_recoverable() {
        let err = TrackerError::InvalidConfig("tolerance must be positive".to_string());
        assert!(!err.is_recoverable());
    }
}
