use serde::{Deserialize, Serialize};

use crate::accumulator::average_pace_min_per_km;
use crate::compress::PathCompressor;
use crate::config::CalorieConfig;
use crate::filter::FilterStats;
use crate::goal::Goal;
use crate::sample::LocationSample;
use crate::session::Session;

/// Final record of a completed session; built once at stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    /// Wall time between start and stop minus paused time
    pub duration_ms: i64,
    pub distance_m: f64,
    /// `None` when no distance was covered
    pub average_pace_min_per_km: Option<f64>,
    pub max_speed_mps: f64,
    pub calories_kcal: f64,
    pub compressed_path: Vec<LocationSample>,
    pub start_timestamp_ms: i64,
    pub end_timestamp_ms: i64,
    pub goal: Option<Goal>,
    pub goal_achieved: bool,
    pub accepted_samples: usize,
    pub rejected_samples: u64,
}

impl RunSummary {
    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_ms as f64 / 60_000.0
    }
}

/// Turns a finished session into its [`RunSummary`]
#[derive(Debug, Clone, Copy)]
pub struct SummaryBuilder {
    compressor: PathCompressor,
    calories: CalorieConfig,
}

impl SummaryBuilder {
    pub fn new(compressor: PathCompressor, calories: CalorieConfig) -> Self {
        Self {
            compressor,
            calories,
        }
    }

    /// Build the summary for a session stopped at `end_ms`
    ///
    /// An empty session (no samples, no elapsed time) yields a valid
    /// zero-valued summary.
    pub fn build(&self, session: &Session, end_ms: i64, stats: &FilterStats) -> RunSummary {
        let end_ms = end_ms.max(session.start_timestamp_ms);
        let paused_ms = session.paused_ms(end_ms);
        let duration_ms = (end_ms - session.start_timestamp_ms - paused_ms).max(0);
        let distance_m = session.total_distance_m;

        let compressed_path = self.compressor.compress(&session.accepted_path);
        log::debug!(
            "Compressed path for {}: {} -> {} points",
            session.id,
            session.accepted_path.len(),
            compressed_path.len()
        );

        RunSummary {
            session_id: session.id.clone(),
            duration_ms,
            distance_m,
            average_pace_min_per_km: average_pace_min_per_km(duration_ms, distance_m),
            max_speed_mps: session.max_speed_mps,
            calories_kcal: self.calories.calories_for(distance_m),
            compressed_path,
            start_timestamp_ms: session.start_timestamp_ms,
            end_timestamp_ms: end_ms,
            goal: session.goal,
            goal_achieved: session.goal_achieved,
            accepted_samples: session.accepted_path.len(),
            rejected_samples: stats.rejected(),
        }
    }
}

impl Default for SummaryBuilder {
    fn default() -> Self {
        Self::new(PathCompressor::default(), CalorieConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MIN: i64 = 60_000;

    #[test]
    fn test_paused_time_excluded() {
        let mut session = Session::new(0, None);
        session.start(0).unwrap();
        session.pause(2 * MIN).unwrap();
        session.resume(7 * MIN).unwrap();
        session.finish(10 * MIN).unwrap();

        let summary = SummaryBuilder::default().build(&session, 10 * MIN, &FilterStats::default());
        assert_eq!(summary.duration_ms, 5 * MIN);
        assert_eq!(summary.end_timestamp_ms, 10 * MIN);
    }

    #[test]
    fn test_empty_session_produces_zero_summary() {
        let mut session = Session::new(1_000, None);
        session.start(1_000).unwrap();
        session.finish(1_000).unwrap();

        let summary = SummaryBuilder::default().build(&session, 1_000, &FilterStats::default());
        assert_eq!(summary.duration_ms, 0);
        assert_eq!(summary.distance_m, 0.0);
        assert_eq!(summary.average_pace_min_per_km, None);
        assert_eq!(summary.calories_kcal, 0.0);
        assert!(summary.compressed_path.is_empty());
        assert!(!summary.goal_achieved);
    }

    #[test]
    fn test_pace_and_calories() {
        let mut session = Session::new(0, None);
        session.start(0).unwrap();
        session.total_distance_m = 5_000.0;
        session.max_speed_mps = 3.9;
        session.finish(30 * MIN).unwrap();

        let builder = SummaryBuilder::new(
            PathCompressor::default(),
            CalorieConfig {
                kcal_per_km: 60.0,
                body_weight_kg: Some(35.0),
            },
        );
        let mut stats = FilterStats::default();
        stats.poor_accuracy = 4;
        stats.jitter = 2;

        let summary = builder.build(&session, 30 * MIN, &stats);
        assert_relative_eq!(summary.average_pace_min_per_km.unwrap(), 6.0, epsilon = 1e-9);
        assert_relative_eq!(summary.calories_kcal, 150.0, epsilon = 1e-9);
        assert_relative_eq!(summary.distance_km(), 5.0);
        assert_relative_eq!(summary.duration_minutes(), 30.0);
        assert_eq!(summary.max_speed_mps, 3.9);
        assert_eq!(summary.rejected_samples, 6);
    }

    #[test]
    fn test_compressed_path_keeps_endpoints() {
        let mut session = Session::new(0, None);
        session.start(0).unwrap();
        for i in 0..50 {
            session.record_sample(LocationSample::new(0.0, i as f64 * 0.0001, 5.0, i * 1_000));
        }
        session.finish(50_000).unwrap();

        let summary = SummaryBuilder::default().build(&session, 50_000, &FilterStats::default());
        assert_eq!(summary.accepted_samples, 50);
        assert_eq!(summary.compressed_path.len(), 2);
        assert_eq!(summary.compressed_path[0], session.accepted_path[0]);
        assert_eq!(summary.compressed_path[1], session.accepted_path[49]);
    }
}
