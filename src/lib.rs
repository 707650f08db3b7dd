// Library interface for trailtrack modules
// This allows integration tests and the CLI to drive the tracking engine

pub mod bootstrap;
pub mod config;
pub mod database;
pub mod error;
pub mod geo;
pub mod import;
pub mod logging;
pub mod metrics;
pub mod mirror;
pub mod models;
pub mod processor;
pub mod providers;
pub mod sampler;
pub mod session;
pub mod simulation;
pub mod steps;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::AppConfig;
pub use database::{SqliteWorkoutStore, WorkoutStore};
pub use error::{ImportError, Result, StorageError, TrailTrackError};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use mirror::{JsonFileMirror, LocalMirror, MemoryMirror};
pub use processor::{GateCounters, LocationStreamProcessor, SampleOutcome};
pub use sampler::{AdaptiveSampler, TrackingConfig};
pub use session::{
    Command, CommandOutcome, FinishOutcome, PrematureFinishChoice, SaveMode, SaveOutcome,
    SessionTracker, TrackerSettings,
};
