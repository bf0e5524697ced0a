use serde::{Deserialize, Serialize};

/// Location fix delivered by the platform location source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    /// Unix epoch milliseconds
    pub timestamp_ms: i64,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            speed_mps: None,
            heading_deg: None,
            timestamp_ms,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }

    /// Finite coordinates within WGS84 bounds and a usable accuracy value
    pub fn is_well_formed(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.accuracy_m.is_finite()
            && self.accuracy_m >= 0.0
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn accuracy_class(&self) -> AccuracyClass {
        AccuracyClass::from_accuracy(self.accuracy_m)
    }
}

/// Accuracy quality buckets shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyClass {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl AccuracyClass {
    pub fn from_accuracy(accuracy_m: f64) -> Self {
        if accuracy_m <= 5.0 {
            AccuracyClass::Excellent
        } else if accuracy_m <= 10.0 {
            AccuracyClass::Good
        } else if accuracy_m <= 20.0 {
            AccuracyClass::Fair
        } else {
            // NaN lands here too
            AccuracyClass::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccuracyClass::Excellent => "excellent",
            AccuracyClass::Good => "good",
            AccuracyClass::Fair => "fair",
            AccuracyClass::Poor => "poor",
        }
    }
}

impl std::fmt::Display for AccuracyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
