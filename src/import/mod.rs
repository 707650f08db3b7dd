use crate::error::{ImportError, Result};
use crate::models::LocationSample;
use std::path::Path;
use tracing::info;

pub mod csv;
pub mod gpx;

/// Accuracy assumed for track points that carry no precision information
pub const DEFAULT_ACCURACY_M: f64 = 5.0;

/// Trait for reading recorded GPS tracks from different file formats
pub trait TrackImporter {
    /// Check if this importer can handle the given file
    fn can_import(&self, file_path: &Path) -> bool;

    /// Read the track as location samples in recording order
    fn import_file(&self, file_path: &Path) -> Result<Vec<LocationSample>>;

    /// Get the format name for this importer
    fn get_format_name(&self) -> &'static str;
}

pub(crate) fn has_extension(file_path: &Path, expected: &str) -> bool {
    file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// Manager for coordinating different track formats
pub struct ImportManager {
    importers: Vec<Box<dyn TrackImporter>>,
}

impl ImportManager {
    /// Create a new import manager with all available importers
    pub fn new() -> Self {
        let importers: Vec<Box<dyn TrackImporter>> = vec![
            Box::new(gpx::GpxImporter::new()),
            Box::new(csv::CsvImporter::new()),
        ];

        Self { importers }
    }

    /// Import a single file, auto-detecting the format
    pub fn import_file(&self, file_path: &Path) -> Result<Vec<LocationSample>> {
        if !file_path.exists() {
            return Err(ImportError::FileNotFound {
                path: file_path.to_path_buf(),
            }
            .into());
        }

        for importer in &self.importers {
            if importer.can_import(file_path) {
                let mut samples = importer.import_file(file_path)?;
                samples.sort_by_key(|s| s.timestamp);
                info!(
                    file = %file_path.display(),
                    format = importer.get_format_name(),
                    samples = samples.len(),
                    "Imported track"
                );
                return Ok(samples);
            }
        }

        Err(ImportError::UnsupportedFormat {
            format: file_path
                .extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
        .into())
    }

    pub fn supported_formats(&self) -> Vec<&'static str> {
        self.importers.iter().map(|i| i.get_format_name()).collect()
    }
}

impl Default for ImportManager {
    fn default() -> Self {
        Self::new()
    }
}
