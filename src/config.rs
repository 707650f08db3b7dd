use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bootstrap::BootstrapConfig;
use crate::logging::LogConfig;
use crate::mirror::DEFAULT_CAPACITY;
use crate::sampler::SamplerConfig;
use crate::session::{TrackerConfig, TrackerSettings};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Gate thresholds and lifecycle minimums
    pub tracking: TrackerConfig,

    /// Battery-aware sampling tiers
    pub sampler: SamplerConfig,

    /// Initial fix acquisition
    pub bootstrap: BootstrapConfig,

    pub profile: ProfileSettings,

    pub storage: StorageSettings,

    pub logging: LogConfig,
}

/// Athlete defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// Weight used for calories when the profile has none
    pub default_weight_kg: f64,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            default_weight_kg: 70.0,
        }
    }
}

/// Where workouts are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database of saved workouts
    pub database_path: PathBuf,

    /// JSON file of recent workouts kept when the database is unreachable
    pub mirror_path: PathBuf,

    /// Recent workouts mirrored per user
    pub mirror_capacity: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trailtrack");

        Self {
            database_path: data_dir.join("workouts.db"),
            mirror_path: data_dir.join("recent_workouts.json"),
            mirror_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tracking: TrackerConfig::default(),
            sampler: SamplerConfig::default(),
            bootstrap: BootstrapConfig::default(),
            profile: ProfileSettings::default(),
            storage: StorageSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".trailtrack")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();
        if !config_path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Ignoring invalid config {}: {:#}",
                    config_path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Reject values the tracker cannot run with
    pub fn validate(&self) -> Result<()> {
        let sampler = &self.sampler;
        if !(0.0..=1.0).contains(&sampler.low_battery_threshold)
            || !(0.0..=1.0).contains(&sampler.high_battery_threshold)
            || sampler.low_battery_threshold > sampler.high_battery_threshold
        {
            anyhow::bail!(
                "Battery thresholds must satisfy 0 <= low ({}) <= high ({}) <= 1",
                sampler.low_battery_threshold,
                sampler.high_battery_threshold
            );
        }
        if self.bootstrap.accuracy_ladder.is_empty() {
            anyhow::bail!("bootstrap.accuracy_ladder must name at least one accuracy");
        }
        if self.tracking.gates.max_accuracy_m <= 0.0 {
            anyhow::bail!("tracking.max_accuracy_m must be positive");
        }
        if self.profile.default_weight_kg <= 0.0 {
            anyhow::bail!("profile.default_weight_kg must be positive");
        }
        Ok(())
    }

    /// Settings handed to each new session tracker
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            tracking: self.tracking.clone(),
            sampler: self.sampler.clone(),
            bootstrap: self.bootstrap.clone(),
            default_weight_kg: self.profile.default_weight_kg,
        }
    }
}
