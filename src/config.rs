use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

/// Sample filter thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Samples with a larger accuracy radius are rejected
    pub max_accuracy_m: f64,
    /// Implied speed above this is treated as a GPS teleport
    pub max_speed_mps: f64,
    /// Movement below this is treated as stationary jitter
    pub min_movement_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 20.0,
            // 7 m/s running ceiling plus margin
            max_speed_mps: 10.0,
            min_movement_m: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub tolerance_m: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { tolerance_m: 5.0 }
    }
}

/// Energy model: fixed cost per kilometer, scaled by body weight over 70 kg
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorieConfig {
    pub kcal_per_km: f64,
    pub body_weight_kg: Option<f64>,
}

impl Default for CalorieConfig {
    fn default() -> Self {
        Self {
            kcal_per_km: 60.0,
            body_weight_kg: None,
        }
    }
}

impl CalorieConfig {
    pub const REFERENCE_WEIGHT_KG: f64 = 70.0;

    pub fn calories_for(&self, distance_m: f64) -> f64 {
        let scale = self
            .body_weight_kg
            .map(|w| w / Self::REFERENCE_WEIGHT_KG)
            .unwrap_or(1.0);
        (distance_m / 1000.0) * self.kcal_per_km * scale
    }
}

/// Snapshot cadence and recovery window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityConfig {
    /// 0 snapshots after every processed sample
    pub background_interval_ms: i64,
    pub foreground_interval_ms: i64,
    pub staleness_window_ms: i64,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            background_interval_ms: 5_000,
            foreground_interval_ms: 15_000,
            staleness_window_ms: 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// No sample passing the accuracy gate for this long means degraded
    pub silence_threshold_ms: i64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: 30_000,
        }
    }
}

/// Complete tracker configuration
///
/// Every section is optional in the JSON file; missing fields take defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub filter: FilterConfig,
    pub compression: CompressionConfig,
    pub calories: CalorieConfig,
    pub continuity: ContinuityConfig,
    pub signal: SignalConfig,
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> TrackerResult<Self> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&contents)?;
        log::info!("Loaded tracker config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let positive = [
            ("filter.max_accuracy_m", self.filter.max_accuracy_m),
            ("filter.max_speed_mps", self.filter.max_speed_mps),
            ("compression.tolerance_m", self.compression.tolerance_m),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrackerError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if !(self.filter.min_movement_m.is_finite() && self.filter.min_movement_m >= 0.0) {
            return Err(TrackerError::InvalidConfig(
                "filter.min_movement_m must be non-negative".to_string(),
            ));
        }
        if !(self.calories.kcal_per_km.is_finite() && self.calories.kcal_per_km >= 0.0) {
            return Err(TrackerError::InvalidConfig(
                "calories.kcal_per_km must be non-negative".to_string(),
            ));
        }
        if let Some(weight) = self.calories.body_weight_kg {
            if !(weight.is_finite() && weight > 0.0) {
                return Err(TrackerError::InvalidConfig(format!(
                    "calories.body_weight_kg must be positive, got {}",
                    weight
                )));
            }
        }

        let continuity = &self.continuity;
        if continuity.background_interval_ms < 0
            || continuity.foreground_interval_ms < 0
            || continuity.staleness_window_ms <= 0
        {
            return Err(TrackerError::InvalidConfig(
                "continuity intervals must be non-negative and the staleness window positive"
                    .to_string(),
            ));
        }
        if self.signal.silence_threshold_ms <= 0 {
            return Err(TrackerError::InvalidConfig(
                "signal.silence_threshold_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
