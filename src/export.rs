use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::accumulator::pace_min_per_km;
use crate::sample::LocationSample;
use crate::summary::RunSummary;

/// Summary serialized for the upload collaborator
pub fn summary_to_json(summary: &RunSummary) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(summary)
}

pub fn summary_to_json_bytes(summary: &RunSummary) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(summary)
}

/// Epoch millis as RFC 3339 (UTC), falling back to the epoch for garbage input
pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// GPX track format for mapping applications
#[derive(Debug, Serialize)]
pub struct GpxTrack {
    pub name: String,
    pub description: String,
    pub track_points: Vec<GpxPoint>,
}

#[derive(Debug, Serialize)]
pub struct GpxPoint {
    pub lat: f64,
    pub lon: f64,
    pub time: String,
    pub hdop: f64, // horizontal dilution of precision
}

impl GpxTrack {
    /// Generate GPX document XML string
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"run_tracker\">\n");
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str(&format!("    <desc>{}</desc>\n", escape_xml(&self.description)));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str("    <trkseg>\n");

        for point in &self.track_points {
            xml.push_str(&format!(
                "      <trkpt lat=\"{:.7}\" lon=\"{:.7}\">\n",
                point.lat, point.lon
            ));
            xml.push_str(&format!("        <time>{}</time>\n", point.time));
            xml.push_str(&format!("        <hdop>{:.1}</hdop>\n", point.hdop));
            xml.push_str("      </trkpt>\n");
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Create GPX track from location samples
pub fn create_gpx_track(name: &str, description: &str, samples: &[LocationSample]) -> GpxTrack {
    let track_points = samples
        .iter()
        .map(|sample| GpxPoint {
            lat: sample.latitude,
            lon: sample.longitude,
            time: format_timestamp(sample.timestamp_ms),
            hdop: sample.accuracy_m / 2.0, // Approximate HDOP from accuracy
        })
        .collect();

    GpxTrack {
        name: name.to_string(),
        description: description.to_string(),
        track_points,
    }
}

/// GPX of a summary's compressed path
pub fn summary_to_gpx(summary: &RunSummary) -> GpxTrack {
    let description = format!(
        "{:.2} km in {:.1} min, started {}",
        summary.distance_km(),
        summary.duration_minutes(),
        format_timestamp(summary.start_timestamp_ms)
    );
    create_gpx_track(
        &format!("Run {}", summary.session_id),
        &description,
        &summary.compressed_path,
    )
}

/// Human-readable pace, e.g. `5'42"/km`; `--` when undefined
pub fn format_pace(pace_min_per_km: Option<f64>) -> String {
    match pace_min_per_km {
        Some(pace) if pace.is_finite() => {
            let total_secs = (pace * 60.0).round() as i64;
            format!("{}'{:02}\"/km", total_secs / 60, total_secs % 60)
        }
        _ => "--".to_string(),
    }
}

/// Session statistics for display
#[derive(Debug, Clone, Serialize)]
pub struct SummaryStats {
    pub duration_seconds: f64,
    pub distance_km: f64,
    pub average_pace: String,
    pub max_speed_kmh: f64,
    pub best_pace: String,
    pub calories_kcal: f64,
    pub path_points: usize,
}

impl SummaryStats {
    pub fn from_summary(summary: &RunSummary) -> Self {
        SummaryStats {
            duration_seconds: summary.duration_ms as f64 / 1000.0,
            distance_km: summary.distance_km(),
            average_pace: format_pace(summary.average_pace_min_per_km),
            max_speed_kmh: summary.max_speed_mps * 3.6,
            best_pace: format_pace(pace_min_per_km(summary.max_speed_mps)),
            calories_kcal: summary.calories_kcal,
            path_points: summary.compressed_path.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            session_id: "session_1700000000000".to_string(),
            duration_ms: 1_800_000,
            distance_m: 5_000.0,
            average_pace_min_per_km: Some(6.0),
            max_speed_mps: 4.0,
            calories_kcal: 300.0,
            compressed_path: vec![
                LocationSample::new(37.5665, 126.9780, 4.0, 1_700_000_000_000),
                LocationSample::new(37.5700, 126.9800, 6.0, 1_700_001_800_000),
            ],
            start_timestamp_ms: 1_700_000_000_000,
            end_timestamp_ms: 1_700_001_800_000,
            goal: None,
            goal_achieved: false,
            accepted_samples: 420,
            rejected_samples: 12,
        }
    }

    #[test]
    fn test_export_json_serialization() {
        let json = summary_to_json(&summary()).unwrap();
        assert!(json.contains("session_1700000000000"));
        assert!(json.contains("37.5665"));

        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary());
    }

    #[test]
    fn test_gpx_generation() {
        let gpx_xml = summary_to_gpx(&summary()).to_gpx_xml();

        assert!(gpx_xml.contains("<gpx"));
        assert!(gpx_xml.contains("lat=\"37.5665000\""));
        assert!(gpx_xml.contains("2023-11-14T22:13:20.000Z"));
        assert_eq!(gpx_xml.matches("<trkpt").count(), 2);
    }

    #[test]
    fn test_gpx_escapes_names() {
        let track = create_gpx_track("A & B <run>", "", &[]);
        let xml = track.to_gpx_xml();
        assert!(xml.contains("A &amp; B &lt;run&gt;"));
    }

    #[test]
    fn test_format_pace() {
        assert_eq!(format_pace(Some(5.7)), "5'42\"/km");
        assert_eq!(format_pace(Some(6.0)), "6'00\"/km");
        assert_eq!(format_pace(None), "--");
    }

    #[test]
    fn test_summary_stats() {
        let stats = SummaryStats::from_summary(&summary());
        assert_eq!(stats.duration_seconds, 1800.0);
        assert_eq!(stats.average_pace, "6'00\"/km");
        assert!((stats.max_speed_kmh - 14.4).abs() < 1e-9);
        assert_eq!(stats.path_points, 2);
    }
}
