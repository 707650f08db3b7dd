use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use crate::error::{ImportError, Result};
use crate::import::{has_extension, TrackImporter, DEFAULT_ACCURACY_M};
use crate::models::LocationSample;

/// GPX importer for recorded GPS tracks
pub struct GpxImporter;

impl GpxImporter {
    pub fn new() -> Self {
        Self
    }

    /// Parse a GPX document into samples.
    ///
    /// Points without a timestamp are skipped. Accuracy is estimated as twice
    /// the horizontal dilution of precision when present.
    pub fn parse<R: Read>(reader: R) -> Result<Vec<LocationSample>> {
        let gpx = gpx::read(reader).map_err(|e| ImportError::ParseError {
            format: "GPX".to_string(),
            reason: e.to_string(),
        })?;

        let mut samples = Vec::new();
        for track in gpx.tracks {
            for segment in track.segments {
                for point in segment.points {
                    let Some(time) = point.time else {
                        continue;
                    };
                    let formatted = time.format().map_err(|e| ImportError::ParseError {
                        format: "GPX".to_string(),
                        reason: e.to_string(),
                    })?;
                    let timestamp = DateTime::<Utc>::from_str(&formatted).map_err(|e| {
                        ImportError::ParseError {
                            format: "GPX".to_string(),
                            reason: format!("invalid time {}: {}", formatted, e),
                        }
                    })?;

                    let position = point.point();
                    let accuracy_m = point.hdop.map(|h| h * 2.0).unwrap_or(DEFAULT_ACCURACY_M);
                    let mut sample =
                        LocationSample::new(position.0.y, position.0.x, accuracy_m, timestamp);
                    sample.speed_ms = point.speed;
                    samples.push(sample);
                }
            }
        }

        if samples.is_empty() {
            return Err(ImportError::MissingData {
                field: "timestamped track points".to_string(),
            }
            .into());
        }
        Ok(samples)
    }
}

impl Default for GpxImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackImporter for GpxImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "gpx")
    }

    fn import_file(&self, file_path: &Path) -> Result<Vec<LocationSample>> {
        let file = File::open(file_path)?;
        Self::parse(BufReader::new(file))
    }

    fn get_format_name(&self) -> &'static str {
        "GPX"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="trailtrack-tests" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Morning run</name>
    <trkseg>
      <trkpt lat="47.3769" lon="8.5417">
        <time>2024-05-01T07:00:00Z</time>
        <hdop>4.5</hdop>
      </trkpt>
      <trkpt lat="47.3770" lon="8.5418">
        <time>2024-05-01T07:00:03Z</time>
      </trkpt>
      <trkpt lat="47.3771" lon="8.5419"></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_parse_track_points() {
        let samples = GpxImporter::parse(TRACK.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);

        assert!((samples[0].latitude - 47.3769).abs() < 1e-9);
        assert!((samples[0].longitude - 8.5417).abs() < 1e-9);
        assert_eq!(samples[0].accuracy_m, 9.0);
        assert_eq!(samples[1].accuracy_m, DEFAULT_ACCURACY_M);
        assert_eq!((samples[1].timestamp - samples[0].timestamp).num_seconds(), 3);
    }

    #[test]
    fn test_invalid_document() {
        assert!(GpxImporter::parse("not xml".as_bytes()).is_err());
    }

    #[test]
    fn test_can_import() {
        let importer = GpxImporter::new();
        assert!(importer.can_import(Path::new("ride.GPX")));
        assert!(!importer.can_import(Path::new("ride.csv")));
    }
}
