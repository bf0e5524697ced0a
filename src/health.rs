//! GPS signal health
//!
//! Timestamps are session millis rather than `Instant`s so the same
//! monitor works for live sources and replayed logs.

use serde::{Deserialize, Serialize};

use crate::sample::AccuracyClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTransition {
    Degraded { silent_for_ms: i64 },
    Restored { silent_for_ms: i64 },
}

/// Snapshot of signal health for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    pub healthy: bool,
    pub silent_for_ms: i64,
    /// `None` when nothing usable has been received yet
    pub accuracy: Option<AccuracyClass>,
}

/// Tracks how long it has been since a sample passed the accuracy gate
#[derive(Debug, Clone)]
pub struct SignalMonitor {
    silence_threshold_ms: i64,
    last_good_ms: i64,
    degraded: bool,
    last_class: Option<AccuracyClass>,
}

impl SignalMonitor {
    pub fn new(silence_threshold_ms: i64) -> Self {
        SignalMonitor {
            silence_threshold_ms,
            last_good_ms: 0,
            degraded: false,
            last_class: None,
        }
    }

    /// Arm the monitor; silence is measured from `now_ms`
    pub fn reset(&mut self, now_ms: i64) {
        self.last_good_ms = now_ms;
        self.degraded = false;
        self.last_class = None;
    }

    pub fn silence_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.last_good_ms).max(0)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Feed every incoming sample, accepted or not
    pub fn on_sample(
        &mut self,
        class: AccuracyClass,
        passed_accuracy: bool,
        now_ms: i64,
    ) -> Option<SignalTransition> {
        self.last_class = Some(class);
        if passed_accuracy {
            let silent_for_ms = self.silence_ms(now_ms);
            self.last_good_ms = self.last_good_ms.max(now_ms);
            if self.degraded {
                self.degraded = false;
                log::info!("GPS signal restored after {:.1}s", silent_for_ms as f64 / 1000.0);
                return Some(SignalTransition::Restored { silent_for_ms });
            }
            return None;
        }
        self.check(now_ms)
    }

    /// Periodic check; reports the moment silence crosses the threshold
    pub fn check(&mut self, now_ms: i64) -> Option<SignalTransition> {
        let silent_for_ms = self.silence_ms(now_ms);
        if !self.degraded && silent_for_ms > self.silence_threshold_ms {
            self.degraded = true;
            log::warn!(
                "GPS signal degraded: no usable fix for {:.1}s",
                silent_for_ms as f64 / 1000.0
            );
            return Some(SignalTransition::Degraded { silent_for_ms });
        }
        None
    }

    /// Accuracy indicator; reads `poor` (or none) while degraded
    pub fn accuracy_indicator(&self) -> Option<AccuracyClass> {
        if self.degraded {
            self.last_class.map(|_| AccuracyClass::Poor)
        } else {
            self.last_class
        }
    }

    pub fn report(&self, now_ms: i64) -> SignalReport {
        SignalReport {
            healthy: !self.degraded,
            silent_for_ms: self.silence_ms(now_ms),
            accuracy: self.accuracy_indicator(),
        }
    }
}

impl Default for SignalMonitor {
    fn default() -> Self {
        Self::new(30_000)
    }
}
