//! Device and service collaborators consumed by the tracker
//!
//! Every sensor is reached through a narrow trait so the engine can run
//! against real hardware bindings or the deterministic providers in
//! [`crate::simulation`]. Subscriptions hand back opaque handles which the
//! tracker owns and releases on every exit path.

use crate::models::LocationSample;
use crate::sampler::TrackingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Requested accuracy class for a fix or a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationAccuracy {
    BestForNavigation,
    Balanced,
    Low,
}

impl fmt::Display for LocationAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocationAccuracy::BestForNavigation => "best_for_navigation",
            LocationAccuracy::Balanced => "balanced",
            LocationAccuracy::Low => "low",
        };
        write!(f, "{}", name)
    }
}

/// Why location access was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    /// Location services switched off at OS level
    ServicesDisabled,
    /// The user declined the permission prompt
    DeniedByUser,
    /// The host app is missing its location usage declarations
    PlatformConfiguration,
    Other(String),
}

impl DenialReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &str {
        match self {
            DenialReason::ServicesDisabled => "location_services_disabled",
            DenialReason::DeniedByUser => "permission_denied",
            DenialReason::PlatformConfiguration => "platform_config_error",
            DenialReason::Other(code) => code,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied(DenialReason),
}

/// Failure reported by a device collaborator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Platform configuration error: {0}")]
    Configuration(String),

    #[error("Provider failure: {0}")]
    Failed(String),
}

/// Handle of a live location stream subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Handle of a live pedometer subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PedometerHandle(pub u64);

/// Handle of a running duration ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

pub trait LocationProvider {
    fn request_permission(&mut self) -> Result<PermissionStatus, ProviderError>;

    /// One-shot fix, failing with [`ProviderError::Timeout`] past `timeout`
    fn current_fix(
        &mut self,
        accuracy: LocationAccuracy,
        timeout: Duration,
    ) -> Result<LocationSample, ProviderError>;

    fn last_known_fix(&mut self) -> Result<Option<LocationSample>, ProviderError>;

    /// Start delivering samples with the given settings
    fn subscribe(&mut self, config: &TrackingConfig) -> Result<SubscriptionHandle, ProviderError>;

    fn unsubscribe(&mut self, handle: SubscriptionHandle);

    /// Whether the OS still honours a subscription
    fn is_subscription_alive(&self, handle: SubscriptionHandle) -> bool;
}

pub trait BatteryProvider {
    /// Charge as a fraction in `0..=1`
    fn level(&mut self) -> Result<f64, ProviderError>;
}

pub trait PedometerProvider {
    fn is_available(&mut self) -> Result<bool, ProviderError>;

    fn count_since(&mut self, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<u64, ProviderError>;

    /// Begin cumulative step updates for this subscription
    fn subscribe(&mut self) -> Result<PedometerHandle, ProviderError>;

    fn unsubscribe(&mut self, handle: PedometerHandle);
}

/// Periodic timer driving the duration display
pub trait TickerProvider {
    fn start(&mut self, interval: Duration) -> TimerHandle;

    fn cancel(&mut self, handle: TimerHandle);
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration);
}

/// Authentication collaborator, only asked who is signed in
pub trait IdentityProvider {
    fn current_user_id(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.current_user_id().is_some()
    }
}

/// Wall clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_codes() {
        assert_eq!(DenialReason::ServicesDisabled.code(), "location_services_disabled");
        assert_eq!(DenialReason::DeniedByUser.code(), "permission_denied");
        assert_eq!(DenialReason::PlatformConfiguration.code(), "platform_config_error");
        assert_eq!(DenialReason::Other("restricted".into()).to_string(), "restricted");
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Timeout { timeout_ms: 10_000 };
        assert_eq!(err.to_string(), "Timed out after 10000 ms");
    }
}
