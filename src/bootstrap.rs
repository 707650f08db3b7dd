//! Permission and initial fix acquisition
//!
//! Outdoor fixes often fail on the first high-accuracy attempt, so the
//! initial fix walks an accuracy ladder with a bounded timeout per rung and
//! finally falls back to the last known position.

use crate::models::LocationSample;
use crate::providers::{
    Clock, DenialReason, LocationAccuracy, LocationProvider, PermissionStatus, ProviderError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Accuracy requested on each attempt, in order
    pub accuracy_ladder: Vec<LocationAccuracy>,
    pub attempt_timeout_ms: u64,
    /// Pause between a failed attempt and the next one
    pub retry_delay_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            accuracy_ladder: vec![
                LocationAccuracy::BestForNavigation,
                LocationAccuracy::Balanced,
                LocationAccuracy::Low,
            ],
            attempt_timeout_ms: 10_000,
            retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixSource {
    /// Fresh fix from ladder attempt `attempt` (1-based)
    Current {
        attempt: usize,
        accuracy: LocationAccuracy,
    },
    LastKnown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialFix {
    pub sample: LocationSample,
    pub source: FixSource,
}

/// Ask for location authorization and classify any refusal
pub fn acquire_permission(location: &mut dyn LocationProvider) -> PermissionStatus {
    let status = match location.request_permission() {
        Ok(status) => status,
        Err(ProviderError::Configuration(msg)) => {
            warn!(error = %msg, "Location permission request hit a platform configuration error");
            PermissionStatus::Denied(DenialReason::PlatformConfiguration)
        }
        Err(ProviderError::Unavailable(msg)) => {
            warn!(error = %msg, "Location services unavailable");
            PermissionStatus::Denied(DenialReason::ServicesDisabled)
        }
        Err(e) => {
            warn!(error = %e, "Location permission request failed");
            PermissionStatus::Denied(DenialReason::Other(e.to_string()))
        }
    };

    match &status {
        PermissionStatus::Granted => info!("Location permission granted"),
        PermissionStatus::Denied(reason) => info!(reason = %reason, "Location permission denied"),
    }
    status
}

/// Obtain a starting position, or `None` when no position of any kind exists
pub fn acquire_initial_fix(
    location: &mut dyn LocationProvider,
    clock: &dyn Clock,
    config: &BootstrapConfig,
) -> Option<InitialFix> {
    let timeout = Duration::from_millis(config.attempt_timeout_ms);
    let attempts = config.accuracy_ladder.len();

    for (index, accuracy) in config.accuracy_ladder.iter().copied().enumerate() {
        let attempt = index + 1;
        debug!(attempt, %accuracy, "Requesting initial fix");

        match location.current_fix(accuracy, timeout) {
            Ok(sample) => {
                info!(attempt, %accuracy, accuracy_m = sample.accuracy_m, "Initial fix acquired");
                return Some(InitialFix {
                    sample,
                    source: FixSource::Current { attempt, accuracy },
                });
            }
            Err(e) => {
                warn!(attempt, %accuracy, error = %e, "Initial fix attempt failed");
                if attempt < attempts {
                    clock.sleep(Duration::from_millis(config.retry_delay_ms));
                }
            }
        }
    }

    match location.last_known_fix() {
        Ok(Some(sample)) => {
            info!("Using last known position as initial fix");
            Some(InitialFix {
                sample,
                source: FixSource::LastKnown,
            })
        }
        Ok(None) => {
            warn!(attempts, "No last known position available");
            None
        }
        Err(e) => {
            warn!(attempts, error = %e, "Last known position lookup failed");
            None
        }
    }
}
