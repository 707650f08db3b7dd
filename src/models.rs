use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workout types supported by the live tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkoutType {
    Running,
    Walking,
    Cycling,
    #[serde(rename = "HIIT")]
    Hiit,
    Swimming,
    Strength,
    Yoga,
}

impl WorkoutType {
    pub const ALL: [WorkoutType; 7] = [
        WorkoutType::Running,
        WorkoutType::Walking,
        WorkoutType::Cycling,
        WorkoutType::Hiit,
        WorkoutType::Swimming,
        WorkoutType::Strength,
        WorkoutType::Yoga,
    ];

    /// Metabolic equivalent used by the calorie model
    pub fn met(&self) -> f64 {
        match self {
            WorkoutType::Running => 8.0,
            WorkoutType::Walking => 4.0,
            WorkoutType::Cycling => 6.0,
            WorkoutType::Hiit => 7.0,
            WorkoutType::Swimming => 6.0,
            WorkoutType::Strength => 5.0,
            WorkoutType::Yoga => 3.0,
        }
    }

    /// Highest believable speed between two fixes, in m/s
    pub fn max_plausible_speed_ms(&self) -> f64 {
        match self {
            WorkoutType::Running => 9.0,
            WorkoutType::Walking => 3.0,
            WorkoutType::Cycling => 15.0,
            _ => 5.0,
        }
    }
}

impl fmt::Display for WorkoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkoutType::Running => "Running",
            WorkoutType::Walking => "Walking",
            WorkoutType::Cycling => "Cycling",
            WorkoutType::Hiit => "HIIT",
            WorkoutType::Swimming => "Swimming",
            WorkoutType::Strength => "Strength",
            WorkoutType::Yoga => "Yoga",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for WorkoutType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" | "run" => Ok(WorkoutType::Running),
            "walking" | "walk" => Ok(WorkoutType::Walking),
            "cycling" | "ride" | "bike" => Ok(WorkoutType::Cycling),
            "hiit" => Ok(WorkoutType::Hiit),
            "swimming" | "swim" => Ok(WorkoutType::Swimming),
            "strength" => Ok(WorkoutType::Strength),
            "yoga" => Ok(WorkoutType::Yoga),
            _ => Err(format!("Unknown workout type: {}", s)),
        }
    }
}

/// A single GPS fix as delivered by the device location subsystem
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,

    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,

    /// Instantaneous speed reported by the device, m/s
    pub speed_ms: Option<f64>,

    /// Capture time of the fix
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            speed_ms: None,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed_ms: f64) -> Self {
        self.speed_ms = Some(speed_ms);
        self
    }

    pub fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn route_point(&self) -> RoutePoint {
        RoutePoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// One vertex of the workout polyline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Live aggregate metrics of the running session.
///
/// Always replaced as a whole value so observers never see a half-updated
/// set of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Cumulative credited distance in meters
    pub distance_m: f64,

    /// Active time in whole seconds (paused time excluded)
    pub duration_secs: u64,

    /// Seconds per kilometer, `None` until some distance is credited
    pub pace_secs_per_km: Option<f64>,

    /// Average speed in km/h
    pub avg_speed_kmh: f64,

    pub steps: u64,

    /// Estimated kilocalories
    pub calories: f64,
}

impl SessionStats {
    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }
}

/// Lifecycle status of the tracking session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Initializing,
    Active,
    Paused,
    Finishing,
    Completed,
    Discarded,
}

impl SessionState {
    /// Whether a workout is under way (running or paused)
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Finishing => "finishing",
            SessionState::Completed => "completed",
            SessionState::Discarded => "discarded",
        };
        write!(f, "{}", name)
    }
}

/// Link from a tracked workout to a training-program workout slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSlot {
    pub program_id: String,
    pub user_program_id: String,
    pub week_index: u32,
    pub workout_index: u32,
}

/// Athlete data the calorie model needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Body weight in kilograms, if known
    pub weight_kg: Option<f64>,
}

impl UserProfile {
    pub fn with_weight(weight_kg: f64) -> Self {
        Self {
            weight_kg: Some(weight_kg),
        }
    }

    /// Weight to use in calculations, falling back to `default_kg`
    pub fn effective_weight_kg(&self, default_kg: f64) -> f64 {
        self.weight_kg
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(default_kg)
    }
}

/// Immutable result of a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    /// Identifier assigned by whichever store accepted the record
    pub id: Option<String>,

    /// Owner, `None` when nobody was signed in at finish
    pub user_id: Option<String>,

    pub workout_type: WorkoutType,
    pub distance_m: f64,
    pub duration_secs: u64,
    pub pace_secs_per_km: Option<f64>,
    pub avg_speed_kmh: f64,
    pub calories: f64,
    pub steps: u64,
    pub route: Vec<RoutePoint>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub program: Option<ProgramSlot>,
    pub notes: String,
}

impl WorkoutRecord {
    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }

    pub fn is_program_workout(&self) -> bool {
        self.program.is_some()
    }

    /// Copy of this record carrying a store-assigned id
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workout_type_serialization() {
        let json = serde_json::to_string(&WorkoutType::Hiit).unwrap();
        assert_eq!(json, "\"HIIT\"");

        let deserialized: WorkoutType = serde_json::from_str("\"Running\"").unwrap();
        assert_eq!(deserialized, WorkoutType::Running);
    }

    #[test]
    fn test_workout_type_parsing() {
        assert_eq!("running".parse::<WorkoutType>().unwrap(), WorkoutType::Running);
        assert_eq!("HIIT".parse::<WorkoutType>().unwrap(), WorkoutType::Hiit);
        assert!("curling".parse::<WorkoutType>().is_err());

        for workout_type in WorkoutType::ALL {
            let parsed: WorkoutType = workout_type.to_string().parse().unwrap();
            assert_eq!(parsed, workout_type);
        }
    }

    #[test]
    fn test_speed_ceilings() {
        assert_eq!(WorkoutType::Running.max_plausible_speed_ms(), 9.0);
        assert_eq!(WorkoutType::Walking.max_plausible_speed_ms(), 3.0);
        assert_eq!(WorkoutType::Cycling.max_plausible_speed_ms(), 15.0);
        assert_eq!(WorkoutType::Yoga.max_plausible_speed_ms(), 5.0);
        assert_eq!(WorkoutType::Hiit.max_plausible_speed_ms(), 5.0);
    }

    #[test]
    fn test_met_values() {
        assert_eq!(WorkoutType::Running.met(), 8.0);
        assert_eq!(WorkoutType::Yoga.met(), 3.0);
        assert_eq!(WorkoutType::Strength.met(), 5.0);
    }

    #[test]
    fn test_coordinate_validation() {
        let now = Utc::now();
        assert!(LocationSample::new(51.5, -0.12, 5.0, now).has_valid_coordinates());
        assert!(!LocationSample::new(91.0, 0.0, 5.0, now).has_valid_coordinates());
        assert!(!LocationSample::new(f64::NAN, 0.0, 5.0, now).has_valid_coordinates());
    }

    #[test]
    fn test_live_states() {
        assert!(SessionState::Active.is_live());
        assert!(SessionState::Paused.is_live());
        for state in [
            SessionState::Idle,
            SessionState::Initializing,
            SessionState::Finishing,
            SessionState::Completed,
            SessionState::Discarded,
        ] {
            assert!(!state.is_live(), "{}", state);
        }
    }

    #[test]
    fn test_effective_weight() {
        assert_eq!(UserProfile { weight_kg: None }.effective_weight_kg(70.0), 70.0);
        assert_eq!(UserProfile::with_weight(82.5).effective_weight_kg(70.0), 82.5);
        assert_eq!(UserProfile::with_weight(-1.0).effective_weight_kg(70.0), 70.0);
    }
}
