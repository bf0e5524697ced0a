use serde::{Deserialize, Serialize};

use crate::error::Transition;
use crate::goal::GoalAchievement;
use crate::sample::AccuracyClass;
use crate::session::SessionState;
use crate::summary::RunSummary;

/// Live statistics after each accepted sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub distance_m: f64,
    pub duration_ms: i64,
    pub average_pace: Option<f64>,
    pub current_pace: Option<f64>,
    pub calories_kcal: f64,
    pub accuracy_class: AccuracyClass,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    Progress(ProgressEvent),
    GoalAchieved(GoalAchievement),
    SessionCompleted(RunSummary),
    /// No sample passed the accuracy gate for the silence window
    SignalDegraded { silent_for_ms: i64 },
    SignalRestored { silent_for_ms: i64 },
    /// A lifecycle call was not allowed in the current state
    TransitionRejected {
        from: SessionState,
        action: Transition,
    },
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A snapshot replaced the in-memory session
    SessionRestored {
        session_id: String,
        saved_at_ms: i64,
    },
    /// Sample ingestion moved to another source
    SourceChanged { source: String },
    /// The active source ended its stream
    SourceClosed { source: String },
}

impl TrackerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerEvent::Progress(_) => "progress",
            TrackerEvent::GoalAchieved(_) => "goal_achieved",
            TrackerEvent::SessionCompleted(_) => "session_completed",
            TrackerEvent::SignalDegraded { .. } => "signal_degraded",
            TrackerEvent::SignalRestored { .. } => "signal_restored",
            TrackerEvent::TransitionRejected { .. } => "transition_rejected",
            TrackerEvent::StateChanged { .. } => "state_changed",
            TrackerEvent::SessionRestored { .. } => "session_restored",
            TrackerEvent::SourceChanged { .. } => "source_changed",
            TrackerEvent::SourceClosed { .. } => "source_closed",
        }
    }
}
