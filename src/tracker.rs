//! Session controller
//!
//! One `Tracker` owns the live [`Session`] and runs every sample through
//! filter → accumulator → goal evaluator. It does no locking: drive it from a
//! single task or thread (the runtime does exactly that).

use crate::accumulator::{average_pace_min_per_km, DistanceAccumulator};
use crate::compress::PathCompressor;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult, Transition};
use crate::events::{ProgressEvent, TrackerEvent};
use crate::filter::{FilterDecision, FilterStats, SampleFilter};
use crate::goal::{self, Goal};
use crate::health::{SignalMonitor, SignalReport, SignalTransition};
use crate::sample::LocationSample;
use crate::session::{Session, SessionState};
use crate::summary::{RunSummary, SummaryBuilder};

pub struct Tracker {
    config: TrackerConfig,
    filter: SampleFilter,
    accumulator: DistanceAccumulator,
    summary_builder: SummaryBuilder,
    signal: SignalMonitor,
    session: Option<Session>,
    stats: FilterStats,
    goal: Option<Goal>,
    last_summary: Option<RunSummary>,
}

impl Tracker {
    /// Build a tracker from a config that has already passed
    /// [`TrackerConfig::validate`]; use [`Tracker::try_new`] otherwise
    pub fn new(config: TrackerConfig) -> Self {
        Tracker {
            filter: SampleFilter::new(config.filter),
            accumulator: DistanceAccumulator::new(),
            summary_builder: SummaryBuilder::new(
                PathCompressor::new(config.compression.tolerance_m),
                config.calories,
            ),
            signal: SignalMonitor::new(config.signal.silence_threshold_ms),
            session: None,
            stats: FilterStats::default(),
            goal: None,
            last_summary: None,
            config,
        }
    }

    /// Validate `config` first, so a zero tolerance or ceiling never reaches the filter
    pub fn try_new(config: TrackerConfig) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match (&self.session, &self.last_summary) {
            (Some(session), _) => session.state,
            (None, Some(_)) => SessionState::Stopped,
            (None, None) => SessionState::Idle,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    /// Summary of the last stopped session, until `reset`
    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    /// Goal for the next session; also applied to a session still counting down
    pub fn set_goal(&mut self, goal: Option<Goal>) {
        self.goal = goal;
        if let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.state == SessionState::Countdown)
        {
            session.goal = goal;
        }
    }

    fn invalid(&self, action: Transition) -> TrackerError {
        TrackerError::InvalidTransition {
            from: self.state(),
            action,
        }
    }

    /// Idle → Countdown; samples are ignored until `start`
    pub fn begin_countdown(&mut self, now_ms: i64) -> TrackerResult<()> {
        if self.state() != SessionState::Idle {
            return Err(self.invalid(Transition::BeginCountdown));
        }
        self.session = Some(Session::new(now_ms, self.goal));
        Ok(())
    }

    /// Idle | Countdown → Tracking
    pub fn start(&mut self, now_ms: i64) -> TrackerResult<()> {
        match self.state() {
            SessionState::Idle => self.begin_countdown(now_ms)?,
            SessionState::Countdown => {}
            _ => return Err(self.invalid(Transition::Start)),
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TrackerError::InvalidTransition {
                from: SessionState::Idle,
                action: Transition::Start,
            })?;
        session.start(now_ms)?;

        self.stats = FilterStats::default();
        self.accumulator.reset();
        self.signal.reset(now_ms);
        log::info!("Session {} started", session.id);
        Ok(())
    }

    /// Countdown → Idle, discarding the pending session
    pub fn cancel(&mut self) -> TrackerResult<()> {
        if self.state() != SessionState::Countdown {
            return Err(self.invalid(Transition::Cancel));
        }
        self.session = None;
        Ok(())
    }

    /// Tracking → Paused
    pub fn pause(&mut self, now_ms: i64) -> TrackerResult<()> {
        match self.session.as_mut() {
            Some(session) => {
                session.pause(now_ms)?;
                self.accumulator.reset();
                log::info!("Session {} paused", session.id);
                Ok(())
            }
            None => Err(self.invalid(Transition::Pause)),
        }
    }

    /// Paused → Tracking
    pub fn resume(&mut self, now_ms: i64) -> TrackerResult<()> {
        match self.session.as_mut() {
            Some(session) => {
                session.resume(now_ms)?;
                log::info!("Session {} resumed", session.id);
                Ok(())
            }
            None => Err(self.invalid(Transition::Resume)),
        }
    }

    /// Tracking | Paused → Stopped; builds the summary and drops the session
    pub fn stop(&mut self, now_ms: i64) -> TrackerResult<RunSummary> {
        let Some(session) = self.session.as_mut() else {
            return Err(self.invalid(Transition::Stop));
        };
        session.finish(now_ms)?;

        let summary = self.summary_builder.build(session, now_ms, &self.stats);
        log::info!(
            "Session {} stopped: {:.2} km in {:.1} min ({} accepted, {} rejected samples)",
            summary.session_id,
            summary.distance_km(),
            summary.duration_minutes(),
            summary.accepted_samples,
            summary.rejected_samples
        );

        self.session = None;
        self.accumulator.reset();
        self.last_summary = Some(summary.clone());
        Ok(summary)
    }

    /// Stopped → Idle so another session can run
    pub fn reset(&mut self) -> TrackerResult<()> {
        if self.state() != SessionState::Stopped {
            return Err(self.invalid(Transition::Reset));
        }
        self.last_summary = None;
        self.stats = FilterStats::default();
        Ok(())
    }

    /// Replace the live session with a restored one
    pub fn restore(&mut self, session: Session, stats: FilterStats, now_ms: i64) {
        log::info!(
            "Restoring session {} ({:?}, {:.0} m, {} points)",
            session.id,
            session.state,
            session.total_distance_m,
            session.accepted_path.len()
        );
        self.session = Some(session);
        self.stats = stats;
        self.last_summary = None;
        self.accumulator.reset();
        self.signal.reset(now_ms);
    }

    /// One synchronous pass for an incoming sample
    ///
    /// Samples outside Tracking/Paused are ignored. Rejections are counted
    /// and never reported as errors.
    pub fn process_sample(&mut self, sample: LocationSample) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return events;
        };
        if !session.is_active() {
            return events;
        }

        let decision = self.filter.check(&sample, session.last_sample());
        self.stats.record(&decision);

        let passed_accuracy = self.filter.passes_accuracy(&sample);
        if let Some(transition) =
            self.signal
                .on_sample(sample.accuracy_class(), passed_accuracy, sample.timestamp_ms)
        {
            events.push(signal_event(transition));
        }

        let movement = match decision {
            FilterDecision::Reject(reason) => {
                log::trace!("Sample at {} rejected: {:?}", sample.timestamp_ms, reason);
                return events;
            }
            FilterDecision::AcceptFirst => None,
            FilterDecision::Accept(movement) => Some(movement),
        };

        let counted = self
            .accumulator
            .accumulate(session, sample, movement.as_ref());

        events.push(TrackerEvent::Progress(self.progress_at(sample.timestamp_ms)));

        if counted {
            if let Some(session) = self.session.as_mut() {
                if let Some(achievement) = goal::evaluate(session, sample.timestamp_ms) {
                    events.push(TrackerEvent::GoalAchieved(achievement));
                }
            }
        }
        events
    }

    fn progress_at(&self, now_ms: i64) -> ProgressEvent {
        let (distance_m, duration_ms) = self
            .session
            .as_ref()
            .map(|s| (s.total_distance_m, s.active_duration_ms(now_ms)))
            .unwrap_or((0.0, 0));

        ProgressEvent {
            distance_m,
            duration_ms,
            average_pace: average_pace_min_per_km(duration_ms, distance_m),
            current_pace: self.accumulator.current_pace(),
            calories_kcal: self.config.calories.calories_for(distance_m),
            accuracy_class: self
                .signal
                .accuracy_indicator()
                .unwrap_or(crate::sample::AccuracyClass::Poor),
            timestamp_ms: now_ms,
        }
    }

    /// Current live statistics, if a session is running
    pub fn progress(&self, now_ms: i64) -> Option<ProgressEvent> {
        self.session
            .as_ref()
            .filter(|s| s.is_active())
            .map(|_| self.progress_at(now_ms))
    }

    /// Periodic signal check while a session is active
    pub fn check_signal(&mut self, now_ms: i64) -> Option<TrackerEvent> {
        if !self.session.as_ref().is_some_and(|s| s.is_tracking()) {
            return None;
        }
        self.signal.check(now_ms).map(signal_event)
    }

    pub fn signal_report(&self, now_ms: i64) -> SignalReport {
        self.signal.report(now_ms)
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

fn signal_event(transition: SignalTransition) -> TrackerEvent {
    match transition {
        SignalTransition::Degraded { silent_for_ms } => TrackerEvent::SignalDegraded { silent_for_ms },
        SignalTransition::Restored { silent_for_ms } => TrackerEvent::SignalRestored { silent_for_ms },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo;
    use crate::sample::AccuracyClass;
    use approx::assert_relative_eq;

    const MIN: i64 = 60_000;

    /// Samples heading north, ~11.1 m apart every 4 s (~2.8 m/s)
    fn northbound(start_lat: f64, count: usize, start_ts: i64) -> Vec<LocationSample> {
        (0..count)
            .map(|i| {
                LocationSample::new(
                    start_lat + i as f64 * 0.0001,
                    126.9780,
                    5.0,
                    start_ts + i as i64 * 4_000,
                )
            })
            .collect()
    }

    fn feed(tracker: &mut Tracker, samples: &[LocationSample]) -> Vec<TrackerEvent> {
        samples
            .iter()
            .flat_map(|s| tracker.process_sample(*s))
            .collect()
    }

    #[test]
    fn test_lifecycle() {
        let mut tracker = Tracker::default();
        assert_eq!(tracker.state(), SessionState::Idle);

        tracker.begin_countdown(0).unwrap();
        assert_eq!(tracker.state(), SessionState::Countdown);
        tracker.start(3_000).unwrap();
        assert_eq!(tracker.state(), SessionState::Tracking);
        assert_eq!(tracker.session().unwrap().start_timestamp_ms, 3_000);

        tracker.pause(10_000).unwrap();
        tracker.resume(20_000).unwrap();
        let summary = tracker.stop(30_000).unwrap();
        assert_eq!(tracker.state(), SessionState::Stopped);
        assert!(tracker.session().is_none());
        assert_eq!(summary.duration_ms, 17_000);
        assert_eq!(tracker.last_summary(), Some(&summary));

        tracker.reset().unwrap();
        assert_eq!(tracker.state(), SessionState::Idle);
    }

    #[test]
    fn test_invalid_transitions_leave_state() {
        let mut tracker = Tracker::default();
        assert!(matches!(
            tracker.pause(0),
            Err(TrackerError::InvalidTransition {
                from: SessionState::Idle,
                action: Transition::Pause
            })
        ));
        assert!(tracker.stop(0).is_err());
        assert_eq!(tracker.state(), SessionState::Idle);

        tracker.start(0).unwrap();
        assert!(tracker.resume(1).is_err());
        assert!(tracker.start(1).is_err());
        assert_eq!(tracker.state(), SessionState::Tracking);

        tracker.stop(2).unwrap();
        assert!(matches!(
            tracker.pause(3),
            Err(TrackerError::InvalidTransition {
                from: SessionState::Stopped,
                ..
            })
        ));
        assert!(tracker.stop(3).is_err());
        assert!(tracker.start(3).is_err());
    }

    #[test]
    fn test_countdown_ignores_samples_and_can_cancel() {
        let mut tracker = Tracker::default();
        tracker.begin_countdown(0).unwrap();
        assert!(tracker
            .process_sample(LocationSample::new(37.0, 127.0, 5.0, 100))
            .is_empty());
        assert!(tracker.session().unwrap().accepted_path.is_empty());

        tracker.cancel().unwrap();
        assert_eq!(tracker.state(), SessionState::Idle);
        assert!(tracker.cancel().is_err());
    }

    #[test]
    fn test_distance_is_monotonic_while_tracking() {
        let mut tracker = Tracker::default();
        tracker.start(0).unwrap();

        let mut samples = northbound(37.5665, 40, 0);
        // Sprinkle in junk: bad accuracy, a teleport, jitter
        samples.insert(5, LocationSample::new(37.6, 127.0, 50.0, 18_000));
        samples.insert(10, LocationSample::new(38.0, 127.0, 5.0, 37_000));
        samples.insert(15, LocationSample::new(37.56700, 126.9780, 5.0, 55_000));

        let mut last = 0.0;
        for sample in samples {
            tracker.process_sample(sample);
            let total = tracker.session().unwrap().total_distance_m;
            assert!(total >= last);
            last = total;
        }
        assert!(last > 400.0);
        assert!(tracker.stats().rejected() >= 2);
    }

    #[test]
    fn test_poor_accuracy_never_moves_counters() {
        let mut tracker = Tracker::default();
        tracker.start(0).unwrap();
        feed(&mut tracker, &northbound(37.5665, 3, 0));
        let before = tracker.session().unwrap().clone();

        let events = tracker.process_sample(
            LocationSample::new(37.5670, 126.9780, 35.0, 12_000).with_speed(6.0),
        );
        assert!(events.is_empty());

        let after = tracker.session().unwrap();
        assert_eq!(after.total_distance_m, before.total_distance_m);
        assert_eq!(after.max_speed_mps, before.max_speed_mps);
        assert_eq!(after.accepted_path.len(), before.accepted_path.len());
        assert_eq!(tracker.stats().poor_accuracy, 1);
    }

    #[test]
    fn test_teleport_scenario() {
        let mut tracker = Tracker::default();
        tracker.start(0).unwrap();
        let p1 = LocationSample::new(37.5665, 126.9780, 5.0, 1_000);
        let p2 = LocationSample::new(37.5675, 126.9790, 5.0, 2_000);

        tracker.process_sample(p1);
        let events = tracker.process_sample(p2);

        assert!(events.is_empty());
        let session = tracker.session().unwrap();
        assert_eq!(session.accepted_path, vec![p1]);
        assert_eq!(session.total_distance_m, 0.0);
        assert_eq!(tracker.stats().implausible_speed, 1);
    }

    #[test]
    fn test_paused_samples_kept_for_path_only() {
        let mut tracker = Tracker::default();
        tracker.start(0).unwrap();
        let samples = northbound(37.5665, 10, 0);
        feed(&mut tracker, &samples[..5]);
        let distance_before = tracker.session().unwrap().total_distance_m;

        tracker.pause(17_000).unwrap();
        let events = feed(&mut tracker, &samples[5..8]);
        let session = tracker.session().unwrap();
        assert_eq!(session.total_distance_m, distance_before);
        assert_eq!(session.accepted_path.len(), 8);
        assert!(events
            .iter()
            .all(|e| !matches!(e, TrackerEvent::GoalAchieved(_))));

        // After resume only the new movement counts
        tracker.resume(30_000).unwrap();
        feed(&mut tracker, &samples[8..]);
        let expected = distance_before
            + geo::distance_between(&samples[7], &samples[8])
            + geo::distance_between(&samples[8], &samples[9]);
        assert_relative_eq!(
            tracker.session().unwrap().total_distance_m,
            expected,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_pause_excluded_from_summary_duration() {
        let mut tracker = Tracker::default();
        tracker.start(0).unwrap();
        tracker.pause(2 * MIN).unwrap();
        tracker.resume(7 * MIN).unwrap();
        let summary = tracker.stop(10 * MIN).unwrap();
        assert_eq!(summary.duration_ms, 5 * MIN);
    }

    #[test]
    fn test_five_km_goal_fires_once() {
        let mut tracker = Tracker::default();
        tracker.set_goal(Some(Goal::distance_km(5.0)));
        tracker.start(0).unwrap();

        // ~11.1 m per sample; 470 samples ≈ 5.22 km
        let samples = northbound(37.0, 470, 0);
        let events = feed(&mut tracker, &samples);

        let achievements: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::GoalAchieved(a) => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(achievements.len(), 1);
        assert!(achievements[0].value >= 5.0 && achievements[0].value < 5.02);
        assert!(tracker.session().unwrap().goal_achieved);

        // Further progress never re-fires
        let more = feed(&mut tracker, &northbound(37.047, 20, 1_880_000));
        assert!(more.iter().any(|e| matches!(e, TrackerEvent::Progress(_))));
        assert!(more
            .iter()
            .all(|e| !matches!(e, TrackerEvent::GoalAchieved(_))));

        let summary = tracker.stop(2_100_000).unwrap();
        assert!(summary.goal_achieved);
        assert_eq!(summary.goal, Some(Goal::distance_km(5.0)));
    }

    #[test]
    fn test_progress_events() {
        let mut tracker = Tracker::default();
        tracker.start(0).unwrap();
        let samples = northbound(37.5665, 3, 0);

        let first = tracker.process_sample(samples[0]);
        match &first[..] {
            [TrackerEvent::Progress(p)] => {
                assert_eq!(p.distance_m, 0.0);
                assert_eq!(p.average_pace, None);
                assert_eq!(p.current_pace, None);
                assert_eq!(p.accuracy_class, AccuracyClass::Excellent);
            }
            other => panic!("unexpected events {:?}", other),
        }

        tracker.process_sample(samples[1]);
        let progress = tracker.progress(8_000).unwrap();
        assert!(progress.distance_m > 11.0);
        assert_eq!(progress.duration_ms, 8_000);
        assert!(progress.average_pace.is_some());
        assert!(progress.current_pace.is_some());
        assert!(progress.calories_kcal > 0.0);
    }

    #[test]
    fn test_signal_degradation_event() {
        let config = TrackerConfig {
            signal: crate::config::SignalConfig {
                silence_threshold_ms: 10_000,
            },
            ..TrackerConfig::default()
        };
        let mut tracker = Tracker::new(config);
        tracker.start(0).unwrap();
        tracker.process_sample(LocationSample::new(37.0, 127.0, 5.0, 1_000));

        assert_eq!(tracker.check_signal(5_000), None);
        assert_eq!(
            tracker.check_signal(12_000),
            Some(TrackerEvent::SignalDegraded {
                silent_for_ms: 11_000
            })
        );
        assert_eq!(tracker.state(), SessionState::Tracking);

        let events = tracker.process_sample(LocationSample::new(37.0001, 127.0, 5.0, 14_000));
        assert!(matches!(events[0], TrackerEvent::SignalRestored { .. }));
    }

    #[test]
    fn test_empty_stop() {
        let mut tracker = Tracker::default();
        tracker.start(5_000).unwrap();
        let summary = tracker.stop(5_000).unwrap();
        assert_eq!(summary.duration_ms, 0);
        assert_eq!(summary.distance_m, 0.0);
        assert_eq!(summary.average_pace_min_per_km, None);
    }

    #[test]
    fn test_try_new_rejects_invalid_config() {
        let mut config = TrackerConfig::default();
        config.compression.tolerance_m = 0.0;
        assert!(matches!(
            Tracker::try_new(config),
            Err(TrackerError::InvalidConfig(_))
        ));

        let mut config = TrackerConfig::default();
        config.filter.max_speed_mps = -1.0;
        assert!(matches!(
            Tracker::try_new(config),
            Err(TrackerError::InvalidConfig(_))
        ));

        let tracker = Tracker::try_new(TrackerConfig::default()).unwrap();
        assert_eq!(tracker.state(), SessionState::Idle);
    }
}
