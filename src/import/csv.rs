use chrono::{DateTime, NaiveDateTime, Utc};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::error::{ImportError, Result};
use crate::import::{has_extension, TrackImporter, DEFAULT_ACCURACY_M};
use crate::models::LocationSample;

/// CSV importer with flexible column mapping
pub struct CsvImporter {
    column_mapping: HashMap<String, String>,
}

impl CsvImporter {
    pub fn new() -> Self {
        let mut column_mapping = HashMap::new();

        // Common column name variations
        Self::add_mapping(
            &mut column_mapping,
            "timestamp",
            &["timestamp", "time", "datetime", "date_time"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "latitude",
            &["latitude", "lat", "position_lat"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "longitude",
            &["longitude", "lng", "lon", "long", "position_long"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "accuracy",
            &["accuracy", "accuracy_m", "horizontal_accuracy", "hacc"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "speed",
            &["speed", "speed_ms", "velocity"],
        );

        Self { column_mapping }
    }

    fn add_mapping(mapping: &mut HashMap<String, String>, standard: &str, variations: &[&str]) {
        for variation in variations {
            mapping.insert(variation.to_lowercase(), standard.to_string());
        }
    }

    fn parse_datetime(date_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
            return Some(dt.with_timezone(&Utc));
        }

        let formats = [
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S%.f",
            "%d/%m/%Y %H:%M:%S",
        ];
        for format in &formats {
            if let Ok(naive_dt) = NaiveDateTime::parse_from_str(date_str, format) {
                return Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
            }
        }

        // Epoch milliseconds as delivered by mobile location APIs, else seconds
        if let Ok(value) = date_str.parse::<i64>() {
            return if value > 100_000_000_000 {
                DateTime::from_timestamp_millis(value)
            } else {
                DateTime::from_timestamp(value, 0)
            };
        }

        None
    }

    fn normalize_column_name(&self, name: &str) -> String {
        let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");

        self.column_mapping
            .get(&normalized)
            .cloned()
            .unwrap_or(normalized)
    }

    fn parse_error(reason: impl Into<String>) -> ImportError {
        ImportError::ParseError {
            format: "CSV".to_string(),
            reason: reason.into(),
        }
    }

    /// Parse CSV rows into samples; rows without coordinates or time are skipped
    pub fn parse<R: Read>(&self, reader: R) -> Result<Vec<LocationSample>> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| Self::parse_error(e.to_string()))?
            .clone();
        let columns: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (self.normalize_column_name(h), i))
            .collect();

        let column = |name: &str| -> Result<usize> {
            columns.get(name).copied().ok_or_else(|| {
                ImportError::MissingData {
                    field: name.to_string(),
                }
                .into()
            })
        };
        let time_col = column("timestamp")?;
        let lat_col = column("latitude")?;
        let lon_col = column("longitude")?;
        let accuracy_col = columns.get("accuracy").copied();
        let speed_col = columns.get("speed").copied();

        let mut samples = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| Self::parse_error(format!("row {}: {}", line + 2, e)))?;
            let field = |idx: usize| record.get(idx).filter(|v| !v.is_empty());

            let (Some(time), Some(lat), Some(lon)) =
                (field(time_col), field(lat_col), field(lon_col))
            else {
                tracing::debug!(row = line + 2, "Skipping CSV row without position or time");
                continue;
            };

            let timestamp = Self::parse_datetime(time)
                .ok_or_else(|| Self::parse_error(format!("row {}: bad time {}", line + 2, time)))?;
            let latitude: f64 = lat
                .parse()
                .map_err(|_| Self::parse_error(format!("row {}: bad latitude {}", line + 2, lat)))?;
            let longitude: f64 = lon
                .parse()
                .map_err(|_| Self::parse_error(format!("row {}: bad longitude {}", line + 2, lon)))?;
            let accuracy_m = accuracy_col
                .and_then(field)
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ACCURACY_M);

            let mut sample = LocationSample::new(latitude, longitude, accuracy_m, timestamp);
            sample.speed_ms = speed_col.and_then(field).and_then(|v| v.parse().ok());
            samples.push(sample);
        }

        if samples.is_empty() {
            return Err(ImportError::MissingData {
                field: "track rows".to_string(),
            }
            .into());
        }
        Ok(samples)
    }
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackImporter for CsvImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "csv")
    }

    fn import_file(&self, file_path: &Path) -> Result<Vec<LocationSample>> {
        let file = std::fs::File::open(file_path)?;
        self.parse(file)
    }

    fn get_format_name(&self) -> &'static str {
        "CSV"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_aliases() {
        let data = "Time,Lat,Lng,Accuracy,Speed\n\
                    2024-05-01 07:00:00,47.1,8.2,12.5,2.9\n\
                    2024-05-01 07:00:01,47.10002,8.2,,\n";
        let samples = CsvImporter::new().parse(data.as_bytes()).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].accuracy_m, 12.5);
        assert_eq!(samples[0].speed_ms, Some(2.9));
        assert_eq!(samples[1].accuracy_m, DEFAULT_ACCURACY_M);
        assert_eq!(samples[1].speed_ms, None);
    }

    #[test]
    fn test_epoch_millis() {
        let data = "timestamp,latitude,longitude\n1714546800000,47.1,8.2\n";
        let samples = CsvImporter::new().parse(data.as_bytes()).unwrap();
        assert_eq!(samples[0].timestamp.timestamp(), 1_714_546_800);
    }

    #[test]
    fn test_missing_column() {
        let data = "timestamp,latitude\n2024-05-01T07:00:00Z,47.1\n";
        assert!(CsvImporter::new().parse(data.as_bytes()).is_err());
    }

    #[test]
    fn test_rows_without_position_skipped() {
        let data = "time,lat,lon\n2024-05-01T07:00:00Z,,\n2024-05-01T07:00:01Z,47.1,8.2\n";
        let samples = CsvImporter::new().parse(data.as_bytes()).unwrap();
        assert_eq!(samples.len(), 1);
    }
}
