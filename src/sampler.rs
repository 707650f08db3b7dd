//! Battery-adaptive GPS sampling
//!
//! The tracking config is chosen from the battery level at start and again on
//! every resume. Battery read failures and stream start failures degrade to
//! documented defaults instead of blocking tracking.

use crate::error::{Result, TrailTrackError};
use crate::providers::{BatteryProvider, LocationAccuracy, LocationProvider, SubscriptionHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Settings passed to the location stream subscription
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub accuracy: LocationAccuracy,
    pub min_time_interval_ms: u64,
    pub min_distance_interval_m: f64,
}

impl TrackingConfig {
    pub const HIGH: TrackingConfig = TrackingConfig {
        accuracy: LocationAccuracy::BestForNavigation,
        min_time_interval_ms: 1000,
        min_distance_interval_m: 1.0,
    };

    pub const BALANCED: TrackingConfig = TrackingConfig {
        accuracy: LocationAccuracy::Balanced,
        min_time_interval_ms: 2000,
        min_distance_interval_m: 2.0,
    };

    pub const LOW: TrackingConfig = TrackingConfig {
        accuracy: LocationAccuracy::Low,
        min_time_interval_ms: 3000,
        min_distance_interval_m: 5.0,
    };

    /// Conservative settings tried once when the tier config fails to start
    pub const FALLBACK: TrackingConfig = TrackingConfig {
        accuracy: LocationAccuracy::Balanced,
        min_time_interval_ms: 1000,
        min_distance_interval_m: 5.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryTier {
    High,
    Balanced,
    Low,
}

/// Sampler thresholds and per-tier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Levels strictly above this use the high tier
    pub high_battery_threshold: f64,
    /// Levels strictly above this (and not high) use the balanced tier
    pub low_battery_threshold: f64,
    /// Level assumed when the battery cannot be read
    pub fallback_battery_level: f64,
    pub high: TrackingConfig,
    pub balanced: TrackingConfig,
    pub low: TrackingConfig,
    pub fallback: TrackingConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            high_battery_threshold: 0.5,
            low_battery_threshold: 0.2,
            fallback_battery_level: 0.5,
            high: TrackingConfig::HIGH,
            balanced: TrackingConfig::BALANCED,
            low: TrackingConfig::LOW,
            fallback: TrackingConfig::FALLBACK,
        }
    }
}

impl SamplerConfig {
    pub fn tier_for(&self, battery_level: f64) -> BatteryTier {
        if battery_level > self.high_battery_threshold {
            BatteryTier::High
        } else if battery_level > self.low_battery_threshold {
            BatteryTier::Balanced
        } else {
            BatteryTier::Low
        }
    }

    pub fn config_for(&self, tier: BatteryTier) -> TrackingConfig {
        match tier {
            BatteryTier::High => self.high,
            BatteryTier::Balanced => self.balanced,
            BatteryTier::Low => self.low,
        }
    }
}

/// Tracking config for a battery fraction using the default tiers
pub fn select_tracking_config(battery_level: f64) -> TrackingConfig {
    let config = SamplerConfig::default();
    config.config_for(config.tier_for(battery_level))
}

/// A started location stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStart {
    pub handle: SubscriptionHandle,
    pub config: TrackingConfig,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveSampler {
    config: SamplerConfig,
}

impl AdaptiveSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Battery fraction, or the configured fallback when unreadable
    pub fn read_battery_level(&self, battery: &mut dyn BatteryProvider) -> f64 {
        match battery.level() {
            Ok(level) if level.is_finite() => level.clamp(0.0, 1.0),
            Ok(level) => {
                warn!(level, "Battery reported a non-finite level, assuming fallback");
                self.config.fallback_battery_level
            }
            Err(e) => {
                warn!(error = %e, fallback = self.config.fallback_battery_level, "Battery read failed, assuming fallback level");
                self.config.fallback_battery_level
            }
        }
    }

    /// Read the battery and pick the matching tier config
    pub fn select(&self, battery: &mut dyn BatteryProvider) -> TrackingConfig {
        let level = self.read_battery_level(battery);
        let tier = self.config.tier_for(level);
        let selected = self.config.config_for(tier);
        debug!(level, ?tier, accuracy = %selected.accuracy, "Selected tracking config");
        selected
    }

    /// Subscribe with `selected`, retrying once with the fallback config
    pub fn start_stream(
        &self,
        location: &mut dyn LocationProvider,
        selected: TrackingConfig,
    ) -> Result<StreamStart> {
        match location.subscribe(&selected) {
            Ok(handle) => {
                info!(
                    accuracy = %selected.accuracy,
                    interval_ms = selected.min_time_interval_ms,
                    distance_m = selected.min_distance_interval_m,
                    "Location updates started"
                );
                Ok(StreamStart {
                    handle,
                    config: selected,
                    used_fallback: false,
                })
            }
            Err(e) => {
                warn!(error = %e, "Location updates failed to start, retrying with fallback config");
                let fallback = self.config.fallback;
                let handle = location
                    .subscribe(&fallback)
                    .map_err(TrailTrackError::StreamStart)?;
                info!(accuracy = %fallback.accuracy, "Location updates started with fallback config");
                Ok(StreamStart {
                    handle,
                    config: fallback,
                    used_fallback: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::simulation::{FixedBattery, ScriptedLocation};

    #[test]
    fn test_battery_tiers() {
        assert_eq!(select_tracking_config(0.9), TrackingConfig::HIGH);
        assert_eq!(select_tracking_config(0.5), TrackingConfig::BALANCED);
        assert_eq!(select_tracking_config(0.35), TrackingConfig::BALANCED);
        assert_eq!(select_tracking_config(0.2), TrackingConfig::LOW);
        assert_eq!(select_tracking_config(0.05), TrackingConfig::LOW);
    }

    #[test]
    fn test_battery_failure_assumes_half() {
        let sampler = AdaptiveSampler::default();
        let mut battery = FixedBattery::failing();
        assert_eq!(sampler.read_battery_level(&mut battery), 0.5);
        assert_eq!(sampler.select(&mut battery), TrackingConfig::BALANCED);

        let mut battery = FixedBattery::new(f64::NAN);
        assert_eq!(sampler.read_battery_level(&mut battery), 0.5);
    }

    #[test]
    fn test_stream_falls_back_once() {
        let sampler = AdaptiveSampler::default();
        let mut location = ScriptedLocation::new();
        location.fail_next_subscribes(1);

        let started = sampler
            .start_stream(&mut location, TrackingConfig::HIGH)
            .unwrap();
        assert!(started.used_fallback);
        assert_eq!(started.config, TrackingConfig::FALLBACK);
        assert_eq!(location.subscribe_attempts(), 2);
    }

    #[test]
    fn test_stream_start_failure_surfaces() {
        let sampler = AdaptiveSampler::default();
        let mut location = ScriptedLocation::new();
        location.fail_next_subscribes(2);

        let err = sampler
            .start_stream(&mut location, TrackingConfig::LOW)
            .unwrap_err();
        assert!(matches!(
            err,
            TrailTrackError::StreamStart(ProviderError::Failed(_))
        ));
    }
}
