use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult, Transition};
use crate::goal::Goal;
use crate::sample::LocationSample;

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session
    Idle,
    /// Pre-start; samples are ignored
    Countdown,
    /// Samples accumulate distance and duration
    Tracking,
    /// Samples are recorded to the path but excluded from distance/duration
    Paused,
    /// Terminal; the summary is available
    Stopped,
}

/// A pause; `end_ms` is `None` while the pause is still open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PausedInterval {
    pub start_ms: i64,
    pub end_ms: Option<i64>,
}

impl PausedInterval {
    /// Length of the interval, counting an open interval up to `now_ms`
    pub fn duration_ms(&self, now_ms: i64) -> i64 {
        (self.end_ms.unwrap_or(now_ms) - self.start_ms).max(0)
    }

    pub fn is_open(&self) -> bool {
        self.end_ms.is_none()
    }
}

/// Live exercise session
///
/// Owned by a single [`crate::Tracker`]; serialized as-is into snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub start_timestamp_ms: i64,
    pub paused_intervals: Vec<PausedInterval>,
    pub accepted_path: Vec<LocationSample>,
    pub total_distance_m: f64,
    pub max_speed_mps: f64,
    pub goal: Option<Goal>,
    pub goal_achieved: bool,
    /// Last time anything in the session changed; orders snapshots
    pub last_updated_ms: i64,
}

impl Session {
    /// Create a session waiting in `Countdown`
    pub fn new(now_ms: i64, goal: Option<Goal>) -> Self {
        Session {
            id: format!("session_{}", now_ms),
            state: SessionState::Countdown,
            start_timestamp_ms: now_ms,
            paused_intervals: Vec::new(),
            accepted_path: Vec::with_capacity(1024),
            total_distance_m: 0.0,
            max_speed_mps: 0.0,
            goal,
            goal_achieved: false,
            last_updated_ms: now_ms,
        }
    }

    fn invalid(&self, action: Transition) -> TrackerError {
        TrackerError::InvalidTransition {
            from: self.state,
            action,
        }
    }

    /// Transition to Tracking (Countdown → Tracking); the clock starts here
    pub fn start(&mut self, now_ms: i64) -> TrackerResult<()> {
        match self.state {
            SessionState::Countdown => {
                self.state = SessionState::Tracking;
                self.start_timestamp_ms = now_ms;
                self.last_updated_ms = now_ms;
                Ok(())
            }
            _ => Err(self.invalid(Transition::Start)),
        }
    }

    /// Transition to Paused (Tracking → Paused)
    pub fn pause(&mut self, now_ms: i64) -> TrackerResult<()> {
        match self.state {
            SessionState::Tracking => {
                let start_ms = now_ms.max(self.latest_mark());
                self.paused_intervals.push(PausedInterval {
                    start_ms,
                    end_ms: None,
                });
                self.state = SessionState::Paused;
                self.touch(now_ms);
                Ok(())
            }
            _ => Err(self.invalid(Transition::Pause)),
        }
    }

    /// Transition back to Tracking (Paused → Tracking)
    pub fn resume(&mut self, now_ms: i64) -> TrackerResult<()> {
        match self.state {
            SessionState::Paused => {
                self.close_open_pause(now_ms);
                self.state = SessionState::Tracking;
                self.touch(now_ms);
                Ok(())
            }
            _ => Err(self.invalid(Transition::Resume)),
        }
    }

    /// Transition to Stopped (Tracking | Paused → Stopped)
    pub fn finish(&mut self, now_ms: i64) -> TrackerResult<()> {
        match self.state {
            SessionState::Tracking | SessionState::Paused => {
                self.close_open_pause(now_ms);
                self.state = SessionState::Stopped;
                self.touch(now_ms);
                Ok(())
            }
            _ => Err(self.invalid(Transition::Stop)),
        }
    }

    fn close_open_pause(&mut self, now_ms: i64) {
        if let Some(open) = self.paused_intervals.last_mut().filter(|p| p.is_open()) {
            open.end_ms = Some(now_ms.max(open.start_ms));
        }
    }

    /// Latest point in time already covered by a pause, or the start
    fn latest_mark(&self) -> i64 {
        self.paused_intervals
            .last()
            .and_then(|p| p.end_ms)
            .unwrap_or(self.start_timestamp_ms)
    }

    fn touch(&mut self, now_ms: i64) {
        self.last_updated_ms = self.last_updated_ms.max(now_ms);
    }

    pub fn is_tracking(&self) -> bool {
        self.state == SessionState::Tracking
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Tracking | SessionState::Paused)
    }

    pub fn last_sample(&self) -> Option<&LocationSample> {
        self.accepted_path.last()
    }

    /// Append an accepted sample; the caller guarantees ascending timestamps
    pub fn record_sample(&mut self, sample: LocationSample) {
        debug_assert!(self
            .last_sample()
            .map_or(true, |last| sample.timestamp_ms > last.timestamp_ms));
        self.touch(sample.timestamp_ms);
        self.accepted_path.push(sample);
    }

    /// Sum of closed pause intervals
    pub fn closed_paused_ms(&self) -> i64 {
        self.paused_intervals
            .iter()
            .filter_map(|p| p.end_ms.map(|end| (end - p.start_ms).max(0)))
            .sum()
    }

    /// Total paused time, counting an open pause up to `now_ms`
    pub fn paused_ms(&self, now_ms: i64) -> i64 {
        self.paused_intervals
            .iter()
            .map(|p| p.duration_ms(now_ms))
            .sum()
    }

    /// Elapsed tracking time: now − start − paused
    pub fn active_duration_ms(&self, now_ms: i64) -> i64 {
        if self.state == SessionState::Countdown {
            return 0;
        }
        (now_ms - self.start_timestamp_ms - self.paused_ms(now_ms)).max(0)
    }
}
