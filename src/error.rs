//! Unified error hierarchy for TrailTrack
//!
//! Only conditions that need a user decision or action surface here. Noise
//! filtering and sensor degradation are handled inside the engine and never
//! become errors.

use crate::models::SessionState;
use crate::providers::{DenialReason, ProviderError};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all TrailTrack operations
#[derive(Debug, Error)]
pub enum TrailTrackError {
    /// Location permission refused, fatal to session start
    #[error("Location permission denied: {0}")]
    Permission(DenialReason),

    /// No position of any kind could be obtained
    #[error("Unable to obtain a location fix after {attempts} attempts")]
    NoFix { attempts: usize },

    /// Neither the selected nor the fallback config could start the stream
    #[error("Failed to start location updates: {0}")]
    StreamStart(ProviderError),

    /// Lifecycle command not accepted in the current state
    #[error("Cannot {command} while session is {state}")]
    InvalidTransition {
        command: &'static str,
        state: SessionState,
    },

    /// Workout persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Track import errors
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistence collaborator errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Nobody signed in, the remote store refuses anonymous records
    #[error("User not authenticated")]
    NotAuthenticated,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Mirror error at {path}: {reason}")]
    Mirror { path: PathBuf, reason: String },

    #[error("Record not found: {id}")]
    NotFound { id: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Track import errors
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Parse error in {format}: {reason}")]
    ParseError { format: String, reason: String },

    #[error("Missing required data: {field}")]
    MissingData { field: String },
}

/// Result type alias for TrailTrack operations
pub type Result<T> = std::result::Result<T, TrailTrackError>;

impl TrailTrackError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrailTrackError::NoFix { .. }
                | TrailTrackError::StreamStart(_)
                | TrailTrackError::Storage(
                    StorageError::Database(_) | StorageError::Unavailable(_)
                )
                | TrailTrackError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TrailTrackError::InvalidTransition { .. } => ErrorSeverity::Warning,
            TrailTrackError::Storage(StorageError::NotAuthenticated) => ErrorSeverity::Warning,
            TrailTrackError::Storage(StorageError::NotFound { .. }) => ErrorSeverity::Warning,
            TrailTrackError::Import(ImportError::FileNotFound { .. }) => ErrorSeverity::Warning,
            TrailTrackError::Permission(_) => ErrorSeverity::Error,
            TrailTrackError::NoFix { .. } => ErrorSeverity::Error,
            TrailTrackError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            TrailTrackError::Permission(DenialReason::ServicesDisabled) => {
                "Location services are turned off. Enable them in your device settings to track workouts."
                    .to_string()
            }
            TrailTrackError::Permission(DenialReason::DeniedByUser) => {
                "Location permission is required to track outdoor workouts.".to_string()
            }
            TrailTrackError::Permission(DenialReason::PlatformConfiguration) => {
                "This build is missing its location configuration. Please reinstall or update the app."
                    .to_string()
            }
            TrailTrackError::NoFix { .. } => {
                "Could not determine your location. Move to an open area and try again.".to_string()
            }
            TrailTrackError::Storage(StorageError::NotAuthenticated) => {
                "Sign in to sync this workout. It has been kept on this device.".to_string()
            }
            TrailTrackError::Import(ImportError::FileNotFound { path }) => {
                format!("Could not find track file: {}", path.display())
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = TrailTrackError::InvalidTransition {
            command: "pause",
            state: SessionState::Idle,
        };
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert_eq!(err.to_string(), "Cannot pause while session is idle");

        let err = TrailTrackError::Internal("boom".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_error_retryable() {
        assert!(TrailTrackError::NoFix { attempts: 3 }.is_retryable());
        assert!(
            TrailTrackError::Storage(StorageError::Unavailable("offline".into())).is_retryable()
        );
        assert!(!TrailTrackError::Permission(DenialReason::DeniedByUser).is_retryable());
        assert!(!TrailTrackError::Storage(StorageError::NotAuthenticated).is_retryable());
    }

    #[test]
    fn test_user_message() {
        let err = TrailTrackError::Permission(DenialReason::ServicesDisabled);
        assert!(err.user_message().contains("Location services are turned off"));

        let err = TrailTrackError::Import(ImportError::FileNotFound {
            path: PathBuf::from("/tmp/track.gpx"),
        });
        assert!(err.user_message().contains("/tmp/track.gpx"));
    }

    #[test]
    fn test_storage_conversion() {
        let err: TrailTrackError = StorageError::NotAuthenticated.into();
        assert!(matches!(
            err,
            TrailTrackError::Storage(StorageError::NotAuthenticated)
        ));
    }
}
