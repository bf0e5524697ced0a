use crate::filter::Movement;
use crate::sample::LocationSample;
use crate::session::Session;

/// Minutes per kilometer for a speed in m/s; `None` when not moving
pub fn pace_min_per_km(speed_mps: f64) -> Option<f64> {
    let speed_kmh = speed_mps * 3.6;
    if speed_kmh.is_finite() && speed_kmh > 0.0 {
        Some(60.0 / speed_kmh)
    } else {
        None
    }
}

/// Elapsed minutes over kilometers covered; `None` when no distance yet
pub fn average_pace_min_per_km(duration_ms: i64, distance_m: f64) -> Option<f64> {
    if distance_m > 0.0 && distance_m.is_finite() {
        let minutes = duration_ms.max(0) as f64 / 60_000.0;
        Some(minutes / (distance_m / 1000.0))
    } else {
        None
    }
}

/// Folds filtered samples into the session's distance and speed statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceAccumulator {
    current_speed_mps: f64,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted sample
    ///
    /// Always appends to the path. Distance and speed only move while the
    /// session is tracking. Returns `true` when the sample counted.
    pub fn accumulate(
        &mut self,
        session: &mut Session,
        sample: LocationSample,
        movement: Option<&Movement>,
    ) -> bool {
        let counts = session.is_tracking();
        session.record_sample(sample);

        if !counts {
            self.current_speed_mps = 0.0;
            return false;
        }

        if let Some(movement) = movement {
            session.total_distance_m += movement.distance_m;
        }

        let speed = sample
            .speed_mps
            .filter(|s| s.is_finite() && *s >= 0.0)
            .or(movement.map(|m| m.derived_speed_mps))
            .unwrap_or(0.0);

        self.current_speed_mps = speed;
        if speed > session.max_speed_mps {
            session.max_speed_mps = speed;
        }
        true
    }

    pub fn current_speed_mps(&self) -> f64 {
        self.current_speed_mps
    }

    pub fn current_pace(&self) -> Option<f64> {
        pace_min_per_km(self.current_speed_mps)
    }

    pub fn reset(&mut self) {
        self.current_speed_mps = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tracking() -> Session {
        let mut session = Session::new(0, None);
        session.start(0).unwrap();
        session
    }

    fn movement(distance_m: f64, dt_ms: i64) -> Movement {
        Movement {
            distance_m,
            dt_ms,
            derived_speed_mps: distance_m / (dt_ms as f64 / 1000.0),
        }
    }

    #[test]
    fn test_pace_helpers() {
        // 10 km/h → 6 min/km
        assert_relative_eq!(pace_min_per_km(10.0 / 3.6).unwrap(), 6.0, epsilon = 1e-9);
        assert_eq!(pace_min_per_km(0.0), None);
        // 30 minutes for 5 km → 6 min/km
        assert_relative_eq!(
            average_pace_min_per_km(30 * 60_000, 5_000.0).unwrap(),
            6.0,
            epsilon = 1e-9
        );
        assert_eq!(average_pace_min_per_km(60_000, 0.0), None);
    }

    #[test]
    fn test_accumulates_while_tracking() {
        let mut session = tracking();
        let mut acc = DistanceAccumulator::new();

        assert!(acc.accumulate(&mut session, LocationSample::new(0.0, 0.0, 5.0, 0), None));
        assert!(acc.accumulate(
            &mut session,
            LocationSample::new(0.0, 0.0001, 5.0, 5_000),
            Some(&movement(11.0, 5_000)),
        ));

        assert_relative_eq!(session.total_distance_m, 11.0);
        assert_relative_eq!(acc.current_speed_mps(), 2.2, epsilon = 1e-9);
        assert_relative_eq!(session.max_speed_mps, 2.2, epsilon = 1e-9);
        assert_eq!(session.accepted_path.len(), 2);
    }

    #[test]
    fn test_reported_speed_preferred() {
        let mut session = tracking();
        let mut acc = DistanceAccumulator::new();
        let sample = LocationSample::new(0.0, 0.0001, 5.0, 5_000).with_speed(3.5);
        acc.accumulate(&mut session, sample, Some(&movement(11.0, 5_000)));
        assert_relative_eq!(session.max_speed_mps, 3.5);
    }

    #[test]
    fn test_paused_samples_recorded_not_counted() {
        let mut session = tracking();
        let mut acc = DistanceAccumulator::new();
        acc.accumulate(&mut session, LocationSample::new(0.0, 0.0, 5.0, 0), None);
        session.pause(1_000).unwrap();

        let counted = acc.accumulate(
            &mut session,
            LocationSample::new(0.0, 0.001, 5.0, 60_000).with_speed(4.0),
            Some(&movement(111.0, 59_000)),
        );

        assert!(!counted);
        assert_eq!(session.total_distance_m, 0.0);
        assert_eq!(session.max_speed_mps, 0.0);
        assert_eq!(session.accepted_path.len(), 2);
        assert_eq!(acc.current_pace(), None);
    }
}
