//! Step estimation
//!
//! Two strategies are chosen once per session: a hardware pedometer when one
//! responds at start, otherwise a stride model fed from credited GPS distance.

use crate::models::WorkoutType;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stride used for types without a dedicated entry
pub const DEFAULT_STRIDE_M: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStrategy {
    /// Counts come from the device step sensor
    Pedometer,
    /// Counts are estimated from distance and stride length
    GpsStride,
}

/// Effective stride length in meters for the given type and current speed.
///
/// `None` for activities that produce no steps.
pub fn stride_length_m(workout_type: WorkoutType, speed_kmh: f64) -> Option<f64> {
    let stride = match workout_type {
        WorkoutType::Running => {
            if speed_kmh > 12.0 {
                0.95
            } else if speed_kmh > 8.0 {
                0.85
            } else {
                0.75
            }
        }
        WorkoutType::Walking => {
            if speed_kmh > 6.0 {
                0.75
            } else if speed_kmh > 4.0 {
                0.65
            } else {
                0.55
            }
        }
        WorkoutType::Hiit => 0.65,
        WorkoutType::Cycling | WorkoutType::Swimming => return None,
        _ => DEFAULT_STRIDE_M,
    };
    Some(stride)
}

/// Steps covered by `distance_m` at `speed_kmh`
pub fn estimate_steps(workout_type: WorkoutType, distance_m: f64, speed_kmh: f64) -> u64 {
    match stride_length_m(workout_type, speed_kmh) {
        Some(stride) if distance_m > 0.0 && distance_m.is_finite() => {
            (distance_m / stride).round() as u64
        }
        _ => 0,
    }
}

/// Per-session step accumulator.
///
/// Pedometer readings are cumulative per subscription. Each subscription
/// segment takes its first reading as baseline; steps from earlier segments
/// are carried so that pausing and resubscribing never loses counts.
#[derive(Debug, Clone)]
pub struct StepCounter {
    strategy: StepStrategy,
    steps: u64,
    carried: u64,
    baseline: Option<u64>,
}

impl StepCounter {
    pub fn new(strategy: StepStrategy) -> Self {
        Self {
            strategy,
            steps: 0,
            carried: 0,
            baseline: None,
        }
    }

    pub fn strategy(&self) -> StepStrategy {
        self.strategy
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Switch to GPS estimation mid-session, keeping the count so far
    pub fn downgrade_to_gps(&mut self) {
        if self.strategy == StepStrategy::Pedometer {
            debug!(steps = self.steps, "Pedometer dropped, estimating steps from GPS");
            self.strategy = StepStrategy::GpsStride;
            self.carried = self.steps;
            self.baseline = None;
        }
    }

    /// Apply a raw pedometer reading. Returns true if the count increased.
    pub fn record_pedometer(&mut self, raw: u64) -> bool {
        if self.strategy != StepStrategy::Pedometer {
            return false;
        }

        let baseline = *self.baseline.get_or_insert(raw);
        let candidate = self.carried + raw.saturating_sub(baseline);

        if candidate > self.steps {
            self.steps = candidate;
            true
        } else {
            false
        }
    }

    /// Credit GPS distance. Returns the number of steps added.
    pub fn record_distance(
        &mut self,
        workout_type: WorkoutType,
        distance_m: f64,
        speed_kmh: f64,
    ) -> u64 {
        if self.strategy != StepStrategy::GpsStride {
            return 0;
        }

        let added = estimate_steps(workout_type, distance_m, speed_kmh);
        self.steps += added;
        added
    }

    /// Close the current pedometer subscription segment
    pub fn end_segment(&mut self) {
        self.carried = self.steps;
        self.baseline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stride_scales_with_speed() {
        assert_eq!(stride_length_m(WorkoutType::Running, 6.0), Some(0.75));
        assert_eq!(stride_length_m(WorkoutType::Running, 10.0), Some(0.85));
        assert_eq!(stride_length_m(WorkoutType::Running, 14.0), Some(0.95));
    }

    #[test]
    fn test_walking_stride_scales_with_speed() {
        assert_eq!(stride_length_m(WorkoutType::Walking, 3.0), Some(0.55));
        assert_eq!(stride_length_m(WorkoutType::Walking, 5.0), Some(0.65));
        assert_eq!(stride_length_m(WorkoutType::Walking, 6.5), Some(0.75));
    }

    #[test]
    fn test_stepless_activities() {
        assert_eq!(stride_length_m(WorkoutType::Cycling, 20.0), None);
        assert_eq!(estimate_steps(WorkoutType::Swimming, 100.0, 3.0), 0);
        assert_eq!(stride_length_m(WorkoutType::Yoga, 2.0), Some(DEFAULT_STRIDE_M));
    }

    #[test]
    fn test_gps_steps_are_additive() {
        let mut counter = StepCounter::new(StepStrategy::GpsStride);
        // 7.5 m at jogging pace with a 0.75 m stride
        assert_eq!(counter.record_distance(WorkoutType::Running, 7.5, 7.0), 10);
        assert_eq!(counter.record_distance(WorkoutType::Running, 7.5, 7.0), 10);
        assert_eq!(counter.steps(), 20);
        assert!(!counter.record_pedometer(500));
    }

    #[test]
    fn test_pedometer_baseline_and_guard() {
        let mut counter = StepCounter::new(StepStrategy::Pedometer);
        assert!(!counter.record_pedometer(1000));
        assert!(counter.record_pedometer(1012));
        assert_eq!(counter.steps(), 12);

        // Noisy lower reading never decreases the count
        assert!(!counter.record_pedometer(1005));
        assert_eq!(counter.steps(), 12);

        // Sensor reset below baseline
        assert!(!counter.record_pedometer(3));
        assert_eq!(counter.steps(), 12);
        assert_eq!(counter.record_distance(WorkoutType::Walking, 50.0, 5.0), 0);
    }

    #[test]
    fn test_pedometer_segments_carry_steps() {
        let mut counter = StepCounter::new(StepStrategy::Pedometer);
        counter.record_pedometer(0);
        counter.record_pedometer(40);
        counter.end_segment();

        // New subscription restarts its own count
        counter.record_pedometer(2);
        assert_eq!(counter.steps(), 40);
        counter.record_pedometer(12);
        assert_eq!(counter.steps(), 50);
    }

    #[test]
    fn test_downgrade_keeps_count() {
        let mut counter = StepCounter::new(StepStrategy::Pedometer);
        counter.record_pedometer(100);
        counter.record_pedometer(130);
        counter.downgrade_to_gps();

        assert_eq!(counter.strategy(), StepStrategy::GpsStride);
        counter.record_distance(WorkoutType::Walking, 6.5, 5.0);
        assert_eq!(counter.steps(), 40);
    }
}
