//! Location stream processing
//!
//! Each sample runs through a fixed sequence of gates before it may move the
//! reference point and credit distance:
//!
//! 1. coordinate sanity and accuracy (rejected samples never reach the route)
//! 2. first sample / re-baseline, which only sets the reference
//! 3. minimum interval since the reference
//! 4. Haversine distance and the per-activity jump filter
//! 5. movement floor, overridden when metrics have been stale too long
//!
//! The processor is pure with respect to devices: feed it samples, read the
//! route and distance back.

use crate::geo;
use crate::models::{LocationSample, RoutePoint, WorkoutType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Gate thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Samples with a worse horizontal accuracy are dropped outright
    pub max_accuracy_m: f64,
    pub min_sample_interval_ms: u64,
    pub movement_floor_m: f64,
    pub walking_movement_floor_m: f64,
    /// Sub-floor movement is credited anyway after this long without a recompute
    pub force_recompute_after_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            min_sample_interval_ms: 250,
            movement_floor_m: 1.0,
            walking_movement_floor_m: 0.5,
            force_recompute_after_ms: 5_000,
        }
    }
}

impl ProcessorConfig {
    pub fn movement_floor_for(&self, workout_type: WorkoutType) -> f64 {
        match workout_type {
            WorkoutType::Walking => self.walking_movement_floor_m,
            _ => self.movement_floor_m,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    InvalidCoordinates,
    LowAccuracy { accuracy_m: f64 },
    TooSoon { elapsed_ms: i64 },
}

/// What the processor did with one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Dropped before touching route or metrics
    Rejected(RejectReason),
    /// Became the reference point without crediting distance
    Reference,
    /// Implied speed over the activity ceiling; route only
    Implausible { distance_m: f64, implied_speed_ms: f64 },
    /// Below the movement floor; route only
    Stationary { distance_m: f64 },
    /// Distance credited and the reference moved
    Credited {
        distance_m: f64,
        elapsed_ms: i64,
        speed_kmh: f64,
        /// Sub-floor movement credited by the staleness rule
        forced: bool,
    },
}

impl SampleOutcome {
    pub fn extends_route(&self) -> bool {
        !matches!(self, SampleOutcome::Rejected(_))
    }

    pub fn credited_distance_m(&self) -> f64 {
        match self {
            SampleOutcome::Credited { distance_m, .. } => *distance_m,
            _ => 0.0,
        }
    }
}

/// Per-gate sample counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCounters {
    pub received: u64,
    pub invalid: u64,
    pub low_accuracy: u64,
    pub too_soon: u64,
    pub references: u64,
    pub implausible: u64,
    pub stationary: u64,
    pub credited: u64,
    pub forced: u64,
}

#[derive(Debug, Clone)]
pub struct LocationStreamProcessor {
    config: ProcessorConfig,
    workout_type: WorkoutType,
    reference: Option<LocationSample>,
    route: Vec<RoutePoint>,
    total_distance_m: f64,
    last_recompute_ms: Option<i64>,
    rebaseline_pending: bool,
    counters: GateCounters,
}

impl LocationStreamProcessor {
    pub fn new(workout_type: WorkoutType, config: ProcessorConfig) -> Self {
        Self {
            config,
            workout_type,
            reference: None,
            route: Vec::new(),
            total_distance_m: 0.0,
            last_recompute_ms: None,
            rebaseline_pending: false,
            counters: GateCounters::default(),
        }
    }

    pub fn workout_type(&self) -> WorkoutType {
        self.workout_type
    }

    pub fn route(&self) -> &[RoutePoint] {
        &self.route
    }

    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }

    pub fn reference(&self) -> Option<&LocationSample> {
        self.reference.as_ref()
    }

    pub fn counters(&self) -> GateCounters {
        self.counters
    }

    /// Make the next usable sample the new reference without crediting distance
    pub fn rebaseline_next(&mut self) {
        self.rebaseline_pending = true;
    }

    pub fn into_route(self) -> Vec<RoutePoint> {
        self.route
    }

    pub fn process(&mut self, sample: LocationSample) -> SampleOutcome {
        self.counters.received += 1;
        let outcome = self.evaluate(sample);

        if outcome.extends_route() {
            self.route.push(sample.route_point());
        }

        match outcome {
            SampleOutcome::Rejected(RejectReason::InvalidCoordinates) => self.counters.invalid += 1,
            SampleOutcome::Rejected(RejectReason::LowAccuracy { .. }) => {
                self.counters.low_accuracy += 1
            }
            SampleOutcome::Rejected(RejectReason::TooSoon { .. }) => self.counters.too_soon += 1,
            SampleOutcome::Reference => self.counters.references += 1,
            SampleOutcome::Implausible { .. } => self.counters.implausible += 1,
            SampleOutcome::Stationary { .. } => self.counters.stationary += 1,
            SampleOutcome::Credited { forced, .. } => {
                self.counters.credited += 1;
                if forced {
                    self.counters.forced += 1;
                }
            }
        }

        debug!(
            lat = sample.latitude,
            lon = sample.longitude,
            accuracy_m = sample.accuracy_m,
            ?outcome,
            total_m = self.total_distance_m,
            "Processed location sample"
        );
        outcome
    }

    fn evaluate(&mut self, sample: LocationSample) -> SampleOutcome {
        if !sample.has_valid_coordinates() {
            return SampleOutcome::Rejected(RejectReason::InvalidCoordinates);
        }
        if !sample.accuracy_m.is_finite() || sample.accuracy_m > self.config.max_accuracy_m {
            return SampleOutcome::Rejected(RejectReason::LowAccuracy {
                accuracy_m: sample.accuracy_m,
            });
        }

        let reference = match self.reference {
            Some(reference) if !self.rebaseline_pending => reference,
            _ => {
                self.set_reference(sample);
                self.rebaseline_pending = false;
                return SampleOutcome::Reference;
            }
        };

        let elapsed_ms = geo::elapsed_ms(&reference, &sample);
        if elapsed_ms < self.config.min_sample_interval_ms as i64 {
            return SampleOutcome::Rejected(RejectReason::TooSoon { elapsed_ms });
        }

        let distance_m = geo::distance_between(&reference, &sample);
        let implied_speed_ms = geo::implied_speed_ms(distance_m, elapsed_ms);
        if implied_speed_ms > self.workout_type.max_plausible_speed_ms() {
            return SampleOutcome::Implausible {
                distance_m,
                implied_speed_ms,
            };
        }

        let floor = self.config.movement_floor_for(self.workout_type);
        let forced = if distance_m >= floor {
            false
        } else if self.metrics_stale(&sample) {
            true
        } else {
            return SampleOutcome::Stationary { distance_m };
        };

        self.total_distance_m += distance_m;
        self.set_reference(sample);

        SampleOutcome::Credited {
            distance_m,
            elapsed_ms,
            speed_kmh: geo::ms_to_kmh(implied_speed_ms),
            forced,
        }
    }

    fn metrics_stale(&self, sample: &LocationSample) -> bool {
        match self.last_recompute_ms {
            Some(last) => {
                sample.timestamp.timestamp_millis() - last
                    > self.config.force_recompute_after_ms as i64
            }
            None => true,
        }
    }

    fn set_reference(&mut self, sample: LocationSample) {
        self.last_recompute_ms = Some(sample.timestamp.timestamp_millis());
        self.reference = Some(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 6, 30, 0).unwrap()
    }

    /// Sample `north_m` meters north of the origin at `ms` after t0
    fn at(north_m: f64, ms: i64, accuracy_m: f64) -> LocationSample {
        let lat = 52.0 + north_m / 111_194.93;
        LocationSample::new(lat, 13.4, accuracy_m, t0() + Duration::milliseconds(ms))
    }

    #[test]
    fn test_first_sample_is_reference() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        assert_eq!(processor.process(at(0.0, 0, 5.0)), SampleOutcome::Reference);
        assert_eq!(processor.route().len(), 1);
        assert_eq!(processor.total_distance_m(), 0.0);
    }

    #[test]
    fn test_accuracy_boundary() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        assert_eq!(
            processor.process(at(0.0, 0, 51.0)),
            SampleOutcome::Rejected(RejectReason::LowAccuracy { accuracy_m: 51.0 })
        );
        assert!(processor.route().is_empty());
        assert_eq!(processor.process(at(0.0, 0, 49.0)), SampleOutcome::Reference);
    }

    #[test]
    fn test_interval_gate() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        processor.process(at(0.0, 0, 5.0));
        assert!(matches!(
            processor.process(at(1.0, 100, 5.0)),
            SampleOutcome::Rejected(RejectReason::TooSoon { elapsed_ms: 100 })
        ));
        assert_eq!(processor.route().len(), 1);
    }

    #[test]
    fn test_jump_filter_depends_on_activity() {
        let mut running = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        running.process(at(0.0, 0, 5.0));
        let outcome = running.process(at(12.0, 1000, 5.0));
        assert!(matches!(outcome, SampleOutcome::Implausible { .. }));
        assert_eq!(running.route().len(), 2);
        assert_eq!(running.total_distance_m(), 0.0);

        let mut cycling = LocationStreamProcessor::new(WorkoutType::Cycling, ProcessorConfig::default());
        cycling.process(at(0.0, 0, 5.0));
        let outcome = cycling.process(at(12.0, 1000, 5.0));
        assert!(matches!(outcome, SampleOutcome::Credited { forced: false, .. }));
        assert!((cycling.total_distance_m() - 12.0).abs() < 0.01);
    }

    #[test]
    fn test_movement_floor() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        processor.process(at(0.0, 0, 5.0));
        assert!(matches!(
            processor.process(at(0.7, 1000, 5.0)),
            SampleOutcome::Stationary { .. }
        ));
        assert_eq!(processor.route().len(), 2);
        assert_eq!(processor.total_distance_m(), 0.0);

        // Walking uses a relaxed floor
        let mut walking = LocationStreamProcessor::new(WorkoutType::Walking, ProcessorConfig::default());
        walking.process(at(0.0, 0, 5.0));
        assert!(matches!(
            walking.process(at(0.7, 1000, 5.0)),
            SampleOutcome::Credited { forced: false, .. }
        ));
    }

    #[test]
    fn test_stale_metrics_force_credit() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        processor.process(at(0.0, 0, 5.0));
        assert!(matches!(processor.process(at(0.3, 2000, 5.0)), SampleOutcome::Stationary { .. }));

        let outcome = processor.process(at(0.6, 5500, 5.0));
        assert!(matches!(outcome, SampleOutcome::Credited { forced: true, .. }));
        assert!((processor.total_distance_m() - 0.6).abs() < 0.01);
        assert_eq!(processor.counters().forced, 1);
    }

    #[test]
    fn test_reference_only_moves_on_credit() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        processor.process(at(0.0, 0, 5.0));
        processor.process(at(40.0, 1000, 5.0));
        let reference = processor.reference().unwrap();
        assert_eq!(reference.timestamp, t0());
    }

    #[test]
    fn test_mixed_accuracy_scenario() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        processor.process(at(0.0, 0, 10.0));
        processor.process(at(3.0, 1000, 60.0));
        let outcome = processor.process(at(6.0, 2000, 15.0));

        assert!(matches!(outcome, SampleOutcome::Credited { .. }));
        assert!((processor.total_distance_m() - 6.0).abs() < 0.01);
        assert_eq!(processor.counters().credited, 1);
        assert_eq!(processor.counters().low_accuracy, 1);
        assert_eq!(processor.counters().received, 3);
    }

    #[test]
    fn test_rebaseline_skips_stale_comparison() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Walking, ProcessorConfig::default());
        processor.process(at(0.0, 0, 5.0));
        processor.process(at(2.0, 1000, 5.0));

        // 400 m away after a long pause would be a jump without re-baselining
        processor.rebaseline_next();
        assert_eq!(processor.process(at(402.0, 60_000, 5.0)), SampleOutcome::Reference);
        assert!((processor.total_distance_m() - 2.0).abs() < 0.01);

        assert!(matches!(
            processor.process(at(404.0, 61_000, 5.0)),
            SampleOutcome::Credited { .. }
        ));
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let mut processor = LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
        let mut sample = at(0.0, 0, 5.0);
        sample.latitude = 95.0;
        assert_eq!(
            processor.process(sample),
            SampleOutcome::Rejected(RejectReason::InvalidCoordinates)
        );
    }
}
