//! Derived workout metrics and their display formatting
//!
//! Calories follow the MET model (MET × kg × hours) and are recomputed from the
//! cumulative duration on every update. Pace is undefined until some distance
//! has been credited and renders as a placeholder.

use crate::models::{SessionStats, WorkoutRecord, WorkoutType};
use serde::{Deserialize, Serialize};

/// Placeholder shown when pace is undefined
pub const PACE_PLACEHOLDER: &str = "--:--";

/// MET-based calorie estimate for `duration_secs` of activity
pub fn calories_burned(workout_type: WorkoutType, weight_kg: f64, duration_secs: u64) -> f64 {
    let hours = duration_secs as f64 / 3600.0;
    workout_type.met() * weight_kg * hours
}

/// Seconds per kilometer, `None` when no distance has been covered
pub fn pace_secs_per_km(distance_m: f64, duration_secs: u64) -> Option<f64> {
    if distance_m <= 0.0 || !distance_m.is_finite() {
        return None;
    }
    Some(duration_secs as f64 / (distance_m / 1000.0))
}

/// Average speed in km/h, zero before any time has elapsed
pub fn average_speed_kmh(distance_m: f64, duration_secs: u64) -> f64 {
    if duration_secs == 0 {
        return 0.0;
    }
    (distance_m / 1000.0) / (duration_secs as f64 / 3600.0)
}

/// Full stats value derived from the cumulative inputs.
///
/// `steps` is passed through untouched since step counting is additive.
pub fn derive_stats(
    workout_type: WorkoutType,
    weight_kg: f64,
    distance_m: f64,
    duration_secs: u64,
    steps: u64,
) -> SessionStats {
    SessionStats {
        distance_m,
        duration_secs,
        pace_secs_per_km: pace_secs_per_km(distance_m, duration_secs),
        avg_speed_kmh: average_speed_kmh(distance_m, duration_secs),
        steps,
        calories: calories_burned(workout_type, weight_kg, duration_secs),
    }
}

/// Format seconds as `HH:MM:SS`
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format a pace in seconds per km as `M:SS`
pub fn format_pace(pace_secs_per_km: Option<f64>) -> String {
    match pace_secs_per_km {
        Some(pace) if pace.is_finite() && pace > 0.0 => {
            let whole = pace.floor() as u64;
            format!("{}:{:02}", whole / 60, whole % 60)
        }
        _ => PACE_PLACEHOLDER.to_string(),
    }
}

/// Human readable summary of a finished workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySummary {
    pub workout_type: String,
    pub distance: String,
    pub duration: String,
    pub pace: String,
    pub avg_speed: String,
    pub calories: String,
    pub steps: u64,
    pub date: String,
}

impl WorkoutRecord {
    pub fn display_summary(&self) -> DisplaySummary {
        DisplaySummary {
            workout_type: self.workout_type.to_string(),
            distance: format!("{:.2} km", self.distance_km()),
            duration: format_duration(self.duration_secs),
            pace: format!("{} /km", format_pace(self.pace_secs_per_km)),
            avg_speed: format!("{:.1} km/h", self.avg_speed_kmh),
            calories: format!("{} kcal", self.calories.round() as u64),
            steps: self.steps,
            date: self.started_at.format("%Y-%m-%d").to_string(),
        }
    }
}
