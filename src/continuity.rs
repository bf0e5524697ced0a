//! Session continuity across suspension
//!
//! [`SnapshotWriter`] owns the only path to the store: a single task drains an
//! operation queue, so writes never overlap. Saves that pile up behind a slow
//! write collapse to the newest one per session; a clear is never dropped and
//! discards the queued saves of its own session only. [`ContinuityManager`]
//! decides when to snapshot and how to recover.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ContinuityConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::session::SessionState;
use crate::store::{SessionSnapshot, SnapshotStore};
use crate::tracker::Tracker;

#[derive(Debug, Clone)]
enum WriteOp {
    Save(SessionSnapshot),
    Clear(String),
}

impl WriteOp {
    fn session_id(&self) -> &str {
        match self {
            WriteOp::Save(snapshot) => snapshot.session_id(),
            WriteOp::Clear(id) => id,
        }
    }
}

/// Fold `op` into the pending batch
///
/// A save replaces a queued save of the same session in place. A clear drops
/// every queued save of its session and is appended. Operations of other
/// sessions are left alone. Returns how many queued ops were superseded.
fn coalesce(pending: &mut Vec<WriteOp>, op: WriteOp) -> u64 {
    match op {
        WriteOp::Save(snapshot) => {
            let last = pending
                .iter()
                .rposition(|queued| queued.session_id() == snapshot.session_id());
            match last {
                Some(idx) if matches!(pending[idx], WriteOp::Save(_)) => {
                    pending[idx] = WriteOp::Save(snapshot);
                    1
                }
                // Nothing queued for this session, or a clear the save must follow
                _ => {
                    pending.push(WriteOp::Save(snapshot));
                    0
                }
            }
        }
        WriteOp::Clear(id) => {
            let before = pending.len();
            pending.retain(|queued| {
                !matches!(queued, WriteOp::Save(s) if s.session_id() == id.as_str())
            });
            let superseded = (before - pending.len()) as u64;
            pending.push(WriteOp::Clear(id));
            superseded
        }
    }
}

/// Counters for the writer task
#[derive(Debug, Default)]
pub struct WriterStats {
    pub submitted: AtomicU64,
    pub superseded: AtomicU64,
    pub written: AtomicU64,
    pub failed: AtomicU64,
}

impl WriterStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Fire-and-forget, strictly ordered snapshot writes
pub struct SnapshotWriter {
    tx: Option<mpsc::UnboundedSender<WriteOp>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<WriterStats>,
}

impl SnapshotWriter {
    /// Spawn the writer task; must be called inside a tokio runtime
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(WriterStats::default());
        let handle = tokio::spawn(writer_loop(store, rx, stats.clone()));
        SnapshotWriter {
            tx: Some(tx),
            handle: Some(handle),
            stats,
        }
    }

    fn submit(&self, op: WriteOp) {
        if let Some(tx) = &self.tx {
            self.stats.submitted.fetch_add(1, Ordering::Relaxed);
            if tx.send(op).is_err() {
                log::warn!("Snapshot writer is gone; dropping write");
            }
        }
    }

    /// Queue a snapshot, superseding a queued one of the same session
    pub fn save(&self, snapshot: SessionSnapshot) {
        self.submit(WriteOp::Save(snapshot));
    }

    /// Queue removal of a session's snapshot behind any in-flight write
    pub fn clear(&self, session_id: impl Into<String>) {
        self.submit(WriteOp::Clear(session_id.into()));
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        self.stats.clone()
    }

    /// Flush every queued write and stop the task
    pub async fn shutdown(mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("Snapshot writer task failed: {}", e);
            }
        }
    }
}

async fn writer_loop(
    store: Arc<dyn SnapshotStore>,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    stats: Arc<WriterStats>,
) {
    // None only once every sender is gone and the queue is empty
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(op) = rx.try_recv() {
            let superseded = coalesce(&mut batch, op);
            stats.superseded.fetch_add(superseded, Ordering::Relaxed);
        }

        for op in batch {
            let session_id = op.session_id().to_string();
            let store = store.clone();
            let result = tokio::task::spawn_blocking(move || match op {
                WriteOp::Save(snapshot) => store.save(&snapshot),
                WriteOp::Clear(id) => store.clear(&id),
            })
            .await
            .map_err(|e| TrackerError::Storage(format!("write task panicked: {}", e)))
            .and_then(|r| r);

            match result {
                Ok(()) => {
                    stats.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    let err = TrackerError::SnapshotWriteFailed {
                        session_id,
                        reason: e.to_string(),
                    };
                    log::warn!("{} (will retry on next snapshot)", err);
                }
            }
        }
    }
    log::debug!("Snapshot writer stopped");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    Foreground,
    Background,
}

/// Which location source the runtime should listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSwitch {
    LowFrequency,
    Normal,
}

/// Restored session details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub session_id: String,
    pub saved_at_ms: i64,
}

/// Snapshot scheduling and recovery policy
pub struct ContinuityManager {
    config: ContinuityConfig,
    store: Arc<dyn SnapshotStore>,
    mode: AppMode,
    last_snapshot_ms: Option<i64>,
}

impl ContinuityManager {
    pub fn new(config: ContinuityConfig, store: Arc<dyn SnapshotStore>) -> Self {
        ContinuityManager {
            config,
            store,
            mode: AppMode::Foreground,
            last_snapshot_ms: None,
        }
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        self.store.clone()
    }

    pub fn snapshot_interval_ms(&self) -> i64 {
        match self.mode {
            AppMode::Foreground => self.config.foreground_interval_ms,
            AppMode::Background => self.config.background_interval_ms,
        }
    }

    /// True when the current mode's interval has elapsed since the last snapshot
    pub fn should_snapshot(&self, now_ms: i64) -> bool {
        match self.last_snapshot_ms {
            None => true,
            Some(last) => now_ms - last >= self.snapshot_interval_ms(),
        }
    }

    /// Snapshot of the live session if one is running and due
    pub fn due_snapshot(&mut self, tracker: &Tracker, now_ms: i64) -> Option<SessionSnapshot> {
        let session = tracker.session().filter(|s| s.is_active())?;
        if !self.should_snapshot(now_ms) {
            return None;
        }
        self.last_snapshot_ms = Some(now_ms);
        Some(SessionSnapshot::new(session.clone(), *tracker.stats(), now_ms))
    }

    /// Forget the schedule so the next session snapshots right away
    pub fn reset_schedule(&mut self) {
        self.last_snapshot_ms = None;
    }

    /// Returns the source to switch to, if any
    pub fn enter_background(&mut self, state: SessionState) -> Option<SourceSwitch> {
        if self.mode == AppMode::Background {
            return None;
        }
        self.mode = AppMode::Background;
        log::info!("Entering background ({:?})", state);
        matches!(state, SessionState::Tracking | SessionState::Paused)
            .then_some(SourceSwitch::LowFrequency)
    }

    /// Back to foreground; adopts a stored snapshot newer than the live session
    ///
    /// Without a live session this runs process-start recovery instead.
    pub fn enter_foreground(
        &mut self,
        tracker: &mut Tracker,
        now_ms: i64,
    ) -> TrackerResult<(Option<SourceSwitch>, Option<Recovered>)> {
        if self.mode == AppMode::Foreground {
            return Ok((None, None));
        }
        self.mode = AppMode::Foreground;
        log::info!("Entering foreground");

        let Some(live) = tracker.session() else {
            let recovered = self.recover(tracker, now_ms)?;
            return Ok((Some(SourceSwitch::Normal), recovered));
        };

        let live_updated_ms = live.last_updated_ms;
        let recovered = match self.store.load(&live.id)? {
            Some(stored) if stored.session.last_updated_ms > live_updated_ms => {
                let recovered = Recovered {
                    session_id: stored.session.id.clone(),
                    saved_at_ms: stored.saved_at_ms,
                };
                tracker.restore(stored.session, stored.stats, now_ms);
                Some(recovered)
            }
            _ => None,
        };
        Ok((Some(SourceSwitch::Normal), recovered))
    }

    /// Process-start recovery
    ///
    /// Restores the latest snapshot when it is within the staleness window;
    /// a stale or finished one is cleared and the tracker stays idle.
    pub fn recover(&mut self, tracker: &mut Tracker, now_ms: i64) -> TrackerResult<Option<Recovered>> {
        let Some(snapshot) = self.store.latest()? else {
            return Ok(None);
        };

        if !snapshot.is_recoverable(now_ms, self.config.staleness_window_ms) {
            log::info!(
                "Discarding snapshot {} in state {:?} ({:.1} min old)",
                snapshot.session_id(),
                snapshot.session.state,
                snapshot.age_ms(now_ms) as f64 / 60_000.0
            );
            self.store.clear(snapshot.session_id())?;
            return Ok(None);
        }

        let recovered = Recovered {
            session_id: snapshot.session.id.clone(),
            saved_at_ms: snapshot.saved_at_ms,
        };
        tracker.restore(snapshot.session, snapshot.stats, now_ms);
        self.last_snapshot_ms = Some(now_ms);
        Ok(Some(recovered))
    }
}
