//! Location sample sources
//!
//! A source hands out a fresh receiver on every `subscribe`; `unsubscribe`
//! closes it. The runtime holds at most one subscription at a time.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::clock::ManualClock;
use crate::error::TrackerResult;
use crate::sample::LocationSample;

const DEFAULT_CAPACITY: usize = 64;

pub trait LocationSource: Send {
    fn name(&self) -> &str;

    fn subscribe(&mut self) -> TrackerResult<mpsc::Receiver<LocationSample>>;

    fn unsubscribe(&mut self);
}

type Slot = Arc<Mutex<Option<mpsc::Sender<LocationSample>>>>;

/// Source fed by the embedder through a [`SamplePusher`]
pub struct ChannelSource {
    name: String,
    capacity: usize,
    slot: Slot,
    dropped: Arc<AtomicU64>,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        ChannelSource {
            name: name.into(),
            capacity: capacity.max(1),
            slot: Arc::new(Mutex::new(None)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn pusher(&self) -> SamplePusher {
        SamplePusher {
            name: self.name.clone(),
            slot: self.slot.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl LocationSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&mut self) -> TrackerResult<mpsc::Receiver<LocationSample>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(tx);
        }
        log::debug!("[{}] subscribed", self.name);
        Ok(rx)
    }

    fn unsubscribe(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.take().is_some() {
                log::debug!("[{}] unsubscribed", self.name);
            }
        }
    }
}

/// Producer side of a [`ChannelSource`]; cheap to clone
#[derive(Clone)]
pub struct SamplePusher {
    name: String,
    slot: Slot,
    dropped: Arc<AtomicU64>,
}

impl SamplePusher {
    /// Deliver a sample without blocking
    ///
    /// Returns false when nobody is subscribed or the channel is full; a
    /// full channel drops the sample.
    pub fn push(&self, sample: LocationSample) -> bool {
        let Ok(slot) = self.slot.lock() else {
            return false;
        };
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        match tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    log::warn!("[{}] channel full, {} samples dropped", self.name, dropped);
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SampleLog {
    Bare(Vec<LocationSample>),
    Wrapped { samples: Vec<LocationSample> },
}

/// Plays back a recorded sample log
///
/// Samples go out in log order. With a speedup the gaps between timestamps
/// are honored (`2.0` plays twice as fast); without one the log is pushed as
/// fast as the consumer reads it. A resubscribe continues where the last
/// subscription stopped.
pub struct ReplaySource {
    name: String,
    samples: Arc<Vec<LocationSample>>,
    cursor: Arc<AtomicUsize>,
    speedup: Option<f64>,
    clock: ManualClock,
    task: Option<JoinHandle<()>>,
}

impl ReplaySource {
    pub fn new(samples: Vec<LocationSample>) -> Self {
        let start = samples.first().map(|s| s.timestamp_ms).unwrap_or(0);
        ReplaySource {
            name: "replay".to_string(),
            samples: Arc::new(samples),
            cursor: Arc::new(AtomicUsize::new(0)),
            speedup: None,
            clock: ManualClock::new(start),
            task: None,
        }
    }

    /// Load a JSON array of samples or `{ "samples": [...] }`, gzip if `.gz`
    pub fn from_path(path: &Path) -> TrackerResult<Self> {
        let file = File::open(path)?;
        let log: SampleLog = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            serde_json::from_reader(BufReader::new(file))?
        };
        let samples = match log {
            SampleLog::Bare(samples) | SampleLog::Wrapped { samples } => samples,
        };
        log::info!("Loaded {} samples from {}", samples.len(), path.display());
        Ok(Self::new(samples))
    }

    pub fn with_speedup(mut self, speedup: f64) -> Self {
        self.speedup = (speedup.is_finite() && speedup > 0.0).then_some(speedup);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Clock that follows the timestamp of the last emitted sample
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.samples
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

impl LocationSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&mut self) -> TrackerResult<mpsc::Receiver<LocationSample>> {
        self.unsubscribe();
        let (tx, rx) = mpsc::channel(DEFAULT_CAPACITY);
        self.task = Some(tokio::spawn(replay_loop(
            self.name.clone(),
            tx,
            self.samples.clone(),
            self.cursor.clone(),
            self.speedup,
            self.clock.clone(),
        )));
        Ok(rx)
    }

    fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn replay_loop(
    name: String,
    tx: mpsc::Sender<LocationSample>,
    samples: Arc<Vec<LocationSample>>,
    cursor: Arc<AtomicUsize>,
    speedup: Option<f64>,
    clock: ManualClock,
) {
    let mut sent = 0u64;
    let mut prev_ts: Option<i64> = None;

    while let Some(sample) = samples.get(cursor.load(Ordering::SeqCst)).copied() {
        if let (Some(speedup), Some(prev)) = (speedup, prev_ts) {
            let gap_ms = (sample.timestamp_ms - prev).max(0) as f64 / speedup;
            sleep(Duration::from_millis(gap_ms as u64)).await;
        }
        prev_ts = Some(sample.timestamp_ms);

        clock.set(sample.timestamp_ms);
        if tx.send(sample).await.is_err() {
            log::debug!("[{}] receiver closed after {} samples", name, sent);
            return;
        }
        cursor.fetch_add(1, Ordering::SeqCst);
        sent += 1;
        if sent % 500 == 0 {
            log::debug!("[{}] {} samples", name, sent);
        }
    }
    log::info!("[{}] finished after {} samples", name, sent);
}
