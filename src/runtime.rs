//! Async session loop
//!
//! One task owns the [`Tracker`]. Samples, commands and a periodic tick are
//! multiplexed with `select!`; every sample is a single synchronous pass, and
//! snapshot writes are handed to the [`SnapshotWriter`] without waiting.
//!
//! Events never block the loop. When the embedder falls behind, progress
//! events are dropped (each one supersedes the last) and every other event
//! waits in a backlog that is flushed as the channel frees up.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::clock::Clock;
use crate::continuity::{AppMode, ContinuityManager, Recovered, SnapshotWriter, SourceSwitch};
use crate::error::{TrackerError, TrackerResult};
use crate::events::TrackerEvent;
use crate::goal::Goal;
use crate::sample::LocationSample;
use crate::session::SessionState;
use crate::source::LocationSource;
use crate::store::SnapshotStore;
use crate::tracker::Tracker;

/// Requests from the embedder to the runner
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginCountdown,
    Start,
    Cancel,
    Pause,
    Resume,
    Stop,
    Reset,
    SetGoal(Option<Goal>),
    EnterBackground,
    EnterForeground,
    Shutdown,
}

/// Lifecycle events held while the event channel is full
const MAX_EVENT_BACKLOG: usize = 1024;

/// How long shutdown waits for the embedder to take the backlog
const BACKLOG_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

enum Step {
    Sample(Option<LocationSample>),
    Command(Option<Command>),
    Tick,
}

pub struct SessionRunner<C: Clock> {
    tracker: Tracker,
    continuity: ContinuityManager,
    normal: Box<dyn LocationSource>,
    low_frequency: Option<Box<dyn LocationSource>>,
    active: Option<SourceSwitch>,
    samples: Option<mpsc::Receiver<LocationSample>>,
    clock: C,
    events: mpsc::Sender<TrackerEvent>,
    backlog: VecDeque<TrackerEvent>,
    dropped_progress: u64,
    tick: Duration,
}

impl<C: Clock> SessionRunner<C> {
    pub fn new(
        tracker: Tracker,
        store: Arc<dyn SnapshotStore>,
        source: Box<dyn LocationSource>,
        clock: C,
        events: mpsc::Sender<TrackerEvent>,
    ) -> Self {
        let continuity = ContinuityManager::new(tracker.config().continuity, store);
        SessionRunner {
            tracker,
            continuity,
            normal: source,
            low_frequency: None,
            active: None,
            samples: None,
            clock,
            events,
            backlog: VecDeque::new(),
            dropped_progress: 0,
            tick: Duration::from_secs(1),
        }
    }

    /// Source used while backgrounded
    pub fn with_low_frequency_source(mut self, source: Box<dyn LocationSource>) -> Self {
        self.low_frequency = Some(source);
        self
    }

    /// Period of signal checks and scheduled snapshots
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until `Shutdown` or until every command sender is dropped
    ///
    /// Recovers a persisted session first. Returns the tracker so callers
    /// can read the final state.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> TrackerResult<Tracker> {
        let writer = SnapshotWriter::spawn(self.continuity.store());

        let now = self.clock.now_ms();
        match self.continuity.recover(&mut self.tracker, now) {
            Ok(Some(recovered)) => self.on_restored(recovered)?,
            Ok(None) => {}
            Err(e) => log::warn!("Snapshot recovery failed, starting fresh: {}", e),
        }

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.flush_backlog();
            let step = tokio::select! {
                biased;
                sample = next_sample(&mut self.samples) => Step::Sample(sample),
                command = commands.recv() => Step::Command(command),
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Sample(Some(sample)) => {
                    for event in self.tracker.process_sample(sample) {
                        self.emit(event);
                    }
                    self.snapshot_if_due(&writer);
                }
                Step::Sample(None) => {
                    self.samples = None;
                    let source = self.active_source_name();
                    log::info!("Location source {} closed", source);
                    self.emit(TrackerEvent::SourceClosed { source });
                }
                Step::Command(Some(Command::Shutdown)) | Step::Command(None) => break,
                Step::Command(Some(command)) => self.handle_command(command, &writer)?,
                Step::Tick => {
                    let now = self.clock.now_ms();
                    if let Some(event) = self.tracker.check_signal(now) {
                        self.emit(event);
                    }
                    self.snapshot_if_due(&writer);
                }
            }
        }

        // A live session keeps its latest state on disk for the next start
        let now = self.clock.now_ms();
        self.continuity.reset_schedule();
        if let Some(snapshot) = self.continuity.due_snapshot(&self.tracker, now) {
            writer.save(snapshot);
        }
        self.switch_source(None)?;
        writer.shutdown().await;
        self.drain_backlog().await;
        if self.dropped_progress > 0 {
            log::info!("Dropped {} progress events for a slow receiver", self.dropped_progress);
        }
        log::info!("Session runner stopped in state {:?}", self.tracker.state());
        Ok(self.tracker)
    }

    fn handle_command(&mut self, command: Command, writer: &SnapshotWriter) -> TrackerResult<()> {
        let now = self.clock.now_ms();
        let before = self.tracker.state();

        let result = match command {
            Command::BeginCountdown => self.tracker.begin_countdown(now),
            Command::Start => self.tracker.start(now),
            Command::Cancel => self.tracker.cancel(),
            Command::Pause => self.tracker.pause(now),
            Command::Resume => self.tracker.resume(now),
            Command::Reset => self.tracker.reset(),
            Command::Stop => self.stop(now, writer),
            Command::SetGoal(goal) => {
                self.tracker.set_goal(goal);
                Ok(())
            }
            Command::EnterBackground => self.enter_background(before),
            Command::EnterForeground => self.enter_foreground(now),
            Command::Shutdown => Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(TrackerError::InvalidTransition { from, action }) => {
                log::warn!("Rejected {} while {:?}", action, from);
                self.emit(TrackerEvent::TransitionRejected { from, action });
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                log::warn!("Command failed: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let after = self.tracker.state();
        if after != before {
            if let Err(e) = self.on_state_changed(before, after, writer) {
                log::warn!("Failed to apply {:?} -> {:?}: {}", before, after, e);
            }
        }
        Ok(())
    }

    fn enter_background(&mut self, state: SessionState) -> TrackerResult<()> {
        if let Some(SourceSwitch::LowFrequency) = self.continuity.enter_background(state) {
            if self.low_frequency.is_some() {
                self.switch_source(Some(SourceSwitch::LowFrequency))?;
            }
        }
        Ok(())
    }

    fn enter_foreground(&mut self, now_ms: i64) -> TrackerResult<()> {
        let (switch, recovered) = self.continuity.enter_foreground(&mut self.tracker, now_ms)?;
        if let Some(recovered) = recovered {
            self.on_restored(recovered)?;
        } else if switch.is_some() && self.active.is_some() {
            self.switch_source(Some(SourceSwitch::Normal))?;
        }
        Ok(())
    }

    fn stop(&mut self, now_ms: i64, writer: &SnapshotWriter) -> TrackerResult<()> {
        let summary = self.tracker.stop(now_ms)?;
        writer.clear(summary.session_id.clone());
        self.emit(TrackerEvent::SessionCompleted(summary));
        Ok(())
    }

    fn on_state_changed(
        &mut self,
        from: SessionState,
        to: SessionState,
        writer: &SnapshotWriter,
    ) -> TrackerResult<()> {
        self.emit(TrackerEvent::StateChanged { from, to });

        match to {
            SessionState::Tracking if from == SessionState::Countdown || from == SessionState::Idle => {
                self.continuity.reset_schedule();
                let switch = self.preferred_source();
                self.switch_source(Some(switch))?;
            }
            SessionState::Idle | SessionState::Stopped => {
                self.switch_source(None)?;
            }
            _ => {}
        }

        // Pause and resume change what a restart would see
        if matches!(to, SessionState::Paused | SessionState::Tracking) {
            self.continuity.reset_schedule();
            self.snapshot_if_due(writer);
        }
        Ok(())
    }

    fn on_restored(&mut self, recovered: Recovered) -> TrackerResult<()> {
        let Recovered {
            session_id,
            saved_at_ms,
        } = recovered;
        self.emit(TrackerEvent::SessionRestored {
            session_id,
            saved_at_ms,
        });
        let switch = self.preferred_source();
        self.switch_source(Some(switch))
    }

    fn preferred_source(&self) -> SourceSwitch {
        match self.continuity.mode() {
            AppMode::Background if self.low_frequency.is_some() => {
                SourceSwitch::LowFrequency
            }
            _ => SourceSwitch::Normal,
        }
    }

    fn active_source_name(&self) -> String {
        match self.active {
            Some(SourceSwitch::LowFrequency) => self
                .low_frequency
                .as_ref()
                .map(|s| s.name().to_string())
                .unwrap_or_default(),
            _ => self.normal.name().to_string(),
        }
    }

    fn source_mut(&mut self, which: SourceSwitch) -> Option<&mut Box<dyn LocationSource>> {
        match which {
            SourceSwitch::Normal => Some(&mut self.normal),
            SourceSwitch::LowFrequency => self.low_frequency.as_mut(),
        }
    }

    /// Move the single subscription to `target`, or drop it with `None`
    fn switch_source(&mut self, target: Option<SourceSwitch>) -> TrackerResult<()> {
        if target == self.active && (target.is_none() || self.samples.is_some()) {
            return Ok(());
        }

        if let Some(current) = self.active.take() {
            if let Some(source) = self.source_mut(current) {
                source.unsubscribe();
            }
        }
        self.samples = None;

        let Some(target) = target else {
            return Ok(());
        };
        let Some(source) = self.source_mut(target) else {
            return Ok(());
        };
        let receiver = source.subscribe()?;
        let name = source.name().to_string();
        self.samples = Some(receiver);
        self.active = Some(target);

        log::info!("Listening to location source {}", name);
        self.emit(TrackerEvent::SourceChanged { source: name });
        Ok(())
    }

    fn snapshot_if_due(&mut self, writer: &SnapshotWriter) {
        let now = self.clock.now_ms();
        if let Some(snapshot) = self.continuity.due_snapshot(&self.tracker, now) {
            writer.save(snapshot);
        }
    }

    /// Hand an event to the embedder without waiting
    fn emit(&mut self, event: TrackerEvent) {
        self.flush_backlog();
        if !self.backlog.is_empty() {
            self.hold(event);
            return;
        }
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => self.hold(event),
            Err(TrySendError::Closed(_)) => log::trace!("Event receiver dropped"),
        }
    }

    fn hold(&mut self, event: TrackerEvent) {
        if matches!(event, TrackerEvent::Progress(_)) {
            self.dropped_progress += 1;
            if self.dropped_progress % 100 == 1 {
                log::warn!(
                    "Event receiver is behind; {} progress events dropped",
                    self.dropped_progress
                );
            }
            return;
        }
        if self.backlog.len() >= MAX_EVENT_BACKLOG {
            if let Some(lost) = self.backlog.pop_front() {
                log::warn!("Event backlog full, dropping {}", lost.kind());
            }
        }
        self.backlog.push_back(event);
    }

    fn flush_backlog(&mut self) {
        while let Some(event) = self.backlog.pop_front() {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.backlog.push_front(event);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    break;
                }
            }
        }
    }

    /// Last chance for held events; bounded so shutdown never hangs
    async fn drain_backlog(&mut self) {
        if self.backlog.is_empty() {
            return;
        }
        let events = self.events.clone();
        let backlog = std::mem::take(&mut self.backlog);
        let held = backlog.len();
        let flush = async move {
            for event in backlog {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(BACKLOG_FLUSH_TIMEOUT, flush).await.is_err() {
            log::warn!("Event receiver stalled; some of {} held events were lost", held);
        }
    }
}

async fn next_sample(samples: &mut Option<mpsc::Receiver<LocationSample>>) -> Option<LocationSample> {
    match samples {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
