//! Path simplification for storage
//!
//! Single-pass anchor simplification: a point is dropped while it, and every
//! point already dropped since the current anchor, stays within tolerance of
//! the segment joining the anchor to the following point. Otherwise it is
//! kept and becomes the new anchor. Deterministic and always keeps both
//! endpoints.
//!
//! The dropped points are never rescanned. Each one narrows a [`Sleeve`], the
//! wedge of headings from the anchor whose rays pass within tolerance of it,
//! so every step is constant work and the whole pass is linear.

use std::f64::consts::{PI, TAU};

use crate::geo;
use crate::sample::LocationSample;

#[derive(Debug, Clone, Copy)]
pub struct PathCompressor {
    tolerance_m: f64,
}

impl PathCompressor {
    pub fn new(tolerance_m: f64) -> Self {
        Self { tolerance_m }
    }

    pub fn tolerance_m(&self) -> f64 {
        self.tolerance_m
    }

    pub fn compress(&self, path: &[LocationSample]) -> Vec<LocationSample> {
        if path.len() <= 2 {
            return path.to_vec();
        }

        let last_idx = path.len() - 1;
        let mut kept = Vec::with_capacity(path.len() / 4 + 2);
        let mut anchor = 0;
        let mut sleeve = Sleeve::default();
        kept.push(path[0]);

        for idx in 1..last_idx {
            let origin = &path[anchor];
            sleeve.admit(offset(origin, &path[idx]), self.tolerance_m);
            if !sleeve.contains(offset(origin, &path[idx + 1])) {
                kept.push(path[idx]);
                anchor = idx;
                sleeve = Sleeve::default();
            }
        }

        kept.push(path[last_idx]);
        kept
    }
}

/// East/north meters of `point` from `origin`
fn offset(origin: &LocationSample, point: &LocationSample) -> (f64, f64) {
    geo::latlon_to_meters(point.latitude, point.longitude, origin.latitude, origin.longitude)
}

/// Wrap to (-PI, PI]
fn wrap_angle(angle: f64) -> f64 {
    let angle = angle % TAU;
    if angle > PI {
        angle - TAU
    } else if angle <= -PI {
        angle + TAU
    } else {
        angle
    }
}

/// Segment ends (seen from the anchor) that keep every admitted point within tolerance
///
/// A point at distance `d >= tol` is within `tol` of a ray whose heading is
/// less than `asin(tol / d)` off its own, and its foot lies on the segment as
/// long as the segment is at least `d` long. Closer points are within
/// tolerance of the anchor itself and add no constraint.
#[derive(Debug, Clone, Copy, Default)]
struct Sleeve {
    /// Heading of the first constraining point; `lo`/`hi` are relative to it
    reference: Option<f64>,
    lo: f64,
    hi: f64,
    /// Farthest constraining point
    reach: f64,
}

impl Sleeve {
    fn admit(&mut self, (x, y): (f64, f64), tolerance_m: f64) {
        let dist = x.hypot(y);
        if dist < tolerance_m {
            return;
        }
        let half = (tolerance_m / dist).asin();
        let heading = y.atan2(x);
        self.reach = self.reach.max(dist);

        match self.reference {
            None => {
                self.reference = Some(heading);
                self.lo = -half;
                self.hi = half;
            }
            Some(reference) => {
                let rel = wrap_angle(heading - reference);
                self.lo = self.lo.max(rel - half);
                self.hi = self.hi.min(rel + half);
            }
        }
    }

    fn contains(&self, (x, y): (f64, f64)) -> bool {
        let Some(reference) = self.reference else {
            return true;
        };
        if x.hypot(y) < self.reach {
            return false;
        }
        let rel = wrap_angle(y.atan2(x) - reference);
        self.lo < rel && rel < self.hi
    }
}

impl Default for PathCompressor {
    fn default() -> Self {
        Self::new(5.0)
    }
}
