//! Two-gate sample filter
//!
//! Gate 1 rejects fixes whose accuracy radius is too large. Gate 2 compares
//! against the last accepted fix and rejects teleports (implied speed above
//! the cap) and stationary jitter (movement below the threshold). The only
//! state consulted is the last accepted sample, which the caller passes in.

use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::geo;
use crate::sample::LocationSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Non-finite or out-of-range coordinates
    Invalid,
    PoorAccuracy,
    /// Timestamp not after the last accepted sample
    OutOfOrder,
    ImplausibleSpeed,
    Jitter,
}

/// Movement relative to the previous accepted sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    pub distance_m: f64,
    pub dt_ms: i64,
    pub derived_speed_mps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterDecision {
    /// First accepted sample of the session
    AcceptFirst,
    Accept(Movement),
    Reject(RejectReason),
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, FilterDecision::Reject(_))
    }
}

/// Per-reason rejection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub accepted: u64,
    pub invalid: u64,
    pub poor_accuracy: u64,
    pub out_of_order: u64,
    pub implausible_speed: u64,
    pub jitter: u64,
}

impl FilterStats {
    pub fn record(&mut self, decision: &FilterDecision) {
        match decision {
            FilterDecision::AcceptFirst | FilterDecision::Accept(_) => self.accepted += 1,
            FilterDecision::Reject(RejectReason::Invalid) => self.invalid += 1,
            FilterDecision::Reject(RejectReason::PoorAccuracy) => self.poor_accuracy += 1,
            FilterDecision::Reject(RejectReason::OutOfOrder) => self.out_of_order += 1,
            FilterDecision::Reject(RejectReason::ImplausibleSpeed) => self.implausible_speed += 1,
            FilterDecision::Reject(RejectReason::Jitter) => self.jitter += 1,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.invalid + self.poor_accuracy + self.out_of_order + self.implausible_speed + self.jitter
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SampleFilter {
    config: FilterConfig,
}

impl SampleFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Accuracy gate alone; also used by the signal monitor
    pub fn passes_accuracy(&self, sample: &LocationSample) -> bool {
        sample.is_well_formed() && sample.accuracy_m <= self.config.max_accuracy_m
    }

    pub fn check(&self, sample: &LocationSample, last: Option<&LocationSample>) -> FilterDecision {
        if !sample.is_well_formed() {
            return FilterDecision::Reject(RejectReason::Invalid);
        }
        if sample.accuracy_m > self.config.max_accuracy_m {
            return FilterDecision::Reject(RejectReason::PoorAccuracy);
        }

        let Some(last) = last else {
            return FilterDecision::AcceptFirst;
        };

        let dt_ms = sample.timestamp_ms - last.timestamp_ms;
        if dt_ms <= 0 {
            return FilterDecision::Reject(RejectReason::OutOfOrder);
        }

        let distance_m = geo::distance_between(last, sample);
        let derived_speed_mps = distance_m / (dt_ms as f64 / 1000.0);

        if derived_speed_mps > self.config.max_speed_mps {
            return FilterDecision::Reject(RejectReason::ImplausibleSpeed);
        }
        if distance_m < self.config.min_movement_m {
            return FilterDecision::Reject(RejectReason::Jitter);
        }

        FilterDecision::Accept(Movement {
            distance_m,
            dt_ms,
            derived_speed_mps,
        })
    }
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lat: f64, lon: f64, accuracy: f64, ts: i64) -> LocationSample {
        LocationSample::new(lat, lon, accuracy, ts)
    }

    #[test]
    fn test_first_sample_accepted() {
        let filter = SampleFilter::default();
        let decision = filter.check(&sample(37.5665, 126.9780, 5.0, 0), None);
        assert_eq!(decision, FilterDecision::AcceptFirst);
    }

    #[test]
    fn test_poor_accuracy_rejected() {
        let filter = SampleFilter::default();
        let decision = filter.check(&sample(37.5665, 126.9780, 25.0, 0), None);
        assert_eq!(decision, FilterDecision::Reject(RejectReason::PoorAccuracy));
        // At the ceiling is still fine
        assert!(filter.check(&sample(37.5665, 126.9780, 20.0, 0), None).is_accepted());
    }

    #[test]
    fn test_teleport_rejected() {
        let filter = SampleFilter::default();
        let first = sample(37.5665, 126.9780, 5.0, 0);
        let second = sample(37.5675, 126.9790, 5.0, 1_000);
        let decision = filter.check(&second, Some(&first));
        assert_eq!(decision, FilterDecision::Reject(RejectReason::ImplausibleSpeed));
    }

    #[test]
    fn test_jitter_rejected() {
        let filter = SampleFilter::default();
        let first = sample(37.5665, 126.9780, 5.0, 0);
        // ~1.1 m north
        let second = sample(37.56651, 126.9780, 5.0, 5_000);
        let decision = filter.check(&second, Some(&first));
        assert_eq!(decision, FilterDecision::Reject(RejectReason::Jitter));
    }

    #[test]
    fn test_plausible_step_accepted() {
        let filter = SampleFilter::default();
        let first = sample(37.5665, 126.9780, 5.0, 0);
        // ~11 m north in 5 s
        let second = sample(37.5666, 126.9780, 8.0, 5_000);
        match filter.check(&second, Some(&first)) {
            FilterDecision::Accept(movement) => {
                assert!((movement.distance_m - 11.12).abs() < 0.05);
                assert_eq!(movement.dt_ms, 5_000);
                assert!((movement.derived_speed_mps - 2.22).abs() < 0.02);
            }
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_order_rejected() {
        let filter = SampleFilter::default();
        let first = sample(37.5665, 126.9780, 5.0, 5_000);
        let same_ts = sample(37.5666, 126.9780, 5.0, 5_000);
        let older = sample(37.5666, 126.9780, 5.0, 4_000);
        assert_eq!(
            filter.check(&same_ts, Some(&first)),
            FilterDecision::Reject(RejectReason::OutOfOrder)
        );
        assert_eq!(
            filter.check(&older, Some(&first)),
            FilterDecision::Reject(RejectReason::OutOfOrder)
        );
    }

    #[test]
    fn test_stats_counting() {
        let mut stats = FilterStats::default();
        stats.record(&FilterDecision::AcceptFirst);
        stats.record(&FilterDecision::Reject(RejectReason::PoorAccuracy));
        stats.record(&FilterDecision::Reject(RejectReason::Jitter));
        stats.record(&FilterDecision::Reject(RejectReason::Jitter));
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.jitter, 2);
        assert_eq!(stats.rejected(), 3);
    }
}
