use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{ProgramSlot, RoutePoint, WorkoutRecord, WorkoutType};

/// Persistence collaborator for finished workouts
pub trait WorkoutStore {
    /// Persist a record and return the id it was stored under
    fn save(&mut self, record: &WorkoutRecord) -> Result<String, StorageError>;

    /// All records of a user, newest first
    fn fetch_by_user(&self, user_id: &str) -> Result<Vec<WorkoutRecord>, StorageError>;
}

/// Gzip-compressed bincode encoding of a route polyline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedRoute {
    pub compressed_data: Vec<u8>,
    pub original_size: usize,
    pub point_count: usize,
}

impl CompressedRoute {
    pub fn compress(route: &[RoutePoint]) -> Result<Self, StorageError> {
        let serialized = bincode::serialize(route)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let original_size = serialized.len();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&serialized)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        let compressed_data = encoder
            .finish()
            .map_err(|e| StorageError::Compression(e.to_string()))?;

        Ok(Self {
            compressed_data,
            original_size,
            point_count: route.len(),
        })
    }

    pub fn decompress(&self) -> Result<Vec<RoutePoint>, StorageError> {
        let mut decoder = GzDecoder::new(self.compressed_data.as_slice());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| StorageError::Compression(e.to_string()))?;

        bincode::deserialize(&decompressed).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Original size / compressed size
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_data.is_empty() {
            return 0.0;
        }
        self.original_size as f64 / self.compressed_data.len() as f64
    }
}

/// Raw column values before conversion into a `WorkoutRecord`
struct StoredRow {
    id: String,
    user_id: Option<String>,
    workout_type: String,
    distance_m: f64,
    duration_secs: i64,
    pace_secs_per_km: Option<f64>,
    avg_speed_kmh: f64,
    calories: f64,
    steps: i64,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    program: Option<String>,
    notes: String,
    route: Option<Vec<u8>>,
}

const SELECT_WORKOUTS: &str = r#"
    SELECT
        w.id, w.user_id, w.workout_type, w.distance_m, w.duration_secs, w.pace_secs_per_km,
        w.avg_speed_kmh, w.calories, w.steps, w.started_at, w.finished_at, w.program, w.notes,
        r.compressed_data
    FROM workouts w
    LEFT JOIN workout_routes r ON r.workout_id = w.id
"#;

/// SQLite-backed workout store
pub struct SqliteWorkoutStore {
    conn: Connection,
}

impl SqliteWorkoutStore {
    /// Create or open a database at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS workouts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                workout_type TEXT NOT NULL,
                distance_m REAL NOT NULL,
                duration_secs INTEGER NOT NULL,
                pace_secs_per_km REAL,
                avg_speed_kmh REAL NOT NULL,
                calories REAL NOT NULL,
                steps INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                program TEXT,
                notes TEXT NOT NULL DEFAULT '',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS workout_routes (
                workout_id TEXT PRIMARY KEY,
                compressed_data BLOB NOT NULL,
                original_size INTEGER NOT NULL,
                point_count INTEGER NOT NULL,
                compression_ratio REAL NOT NULL,
                FOREIGN KEY (workout_id) REFERENCES workouts (id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_workouts_user_started
                ON workouts (user_id, started_at);
            "#,
        )?;
        Ok(())
    }

    /// Most recent workouts across all users
    pub fn fetch_recent(&self, limit: usize) -> Result<Vec<WorkoutRecord>, StorageError> {
        let query = format!("{} ORDER BY w.started_at DESC LIMIT ?1", SELECT_WORKOUTS);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map(params![limit as i64], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::into_record).collect()
    }

    pub fn load(&self, id: &str) -> Result<Option<WorkoutRecord>, StorageError> {
        let query = format!("{} WHERE w.id = ?1", SELECT_WORKOUTS);
        let row = self
            .conn
            .query_row(&query, params![id], Self::read_row)
            .optional()?;
        row.map(Self::into_record).transpose()
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM workouts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<StoredRow> {
        Ok(StoredRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            workout_type: row.get(2)?,
            distance_m: row.get(3)?,
            duration_secs: row.get(4)?,
            pace_secs_per_km: row.get(5)?,
            avg_speed_kmh: row.get(6)?,
            calories: row.get(7)?,
            steps: row.get(8)?,
            started_at: row.get(9)?,
            finished_at: row.get(10)?,
            program: row.get(11)?,
            notes: row.get(12)?,
            route: row.get(13)?,
        })
    }

    fn into_record(row: StoredRow) -> Result<WorkoutRecord, StorageError> {
        let workout_type: WorkoutType = row
            .workout_type
            .parse()
            .map_err(StorageError::Serialization)?;

        let program: Option<ProgramSlot> = row
            .program
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let route = match row.route {
            Some(compressed_data) => CompressedRoute {
                compressed_data,
                original_size: 0,
                point_count: 0,
            }
            .decompress()?,
            None => Vec::new(),
        };

        Ok(WorkoutRecord {
            id: Some(row.id),
            user_id: row.user_id,
            workout_type,
            distance_m: row.distance_m,
            duration_secs: row.duration_secs.max(0) as u64,
            pace_secs_per_km: row.pace_secs_per_km,
            avg_speed_kmh: row.avg_speed_kmh,
            calories: row.calories,
            steps: row.steps.max(0) as u64,
            route,
            started_at: row.started_at,
            finished_at: row.finished_at,
            program,
            notes: row.notes,
        })
    }
}

impl WorkoutStore for SqliteWorkoutStore {
    fn save(&mut self, record: &WorkoutRecord) -> Result<String, StorageError> {
        let user_id = record
            .user_id
            .as_deref()
            .ok_or(StorageError::NotAuthenticated)?;

        // Mirror-assigned ids are not valid remote ids
        let id = match record.id.as_deref() {
            Some(id) if !id.starts_with(crate::mirror::LOCAL_ID_PREFIX) => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        let program = record
            .program
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let route = CompressedRoute::compress(&record.route)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO workouts (
                id, user_id, workout_type, distance_m, duration_secs, pace_secs_per_km,
                avg_speed_kmh, calories, steps, started_at, finished_at, program, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                id,
                user_id,
                record.workout_type.to_string(),
                record.distance_m,
                record.duration_secs as i64,
                record.pace_secs_per_km,
                record.avg_speed_kmh,
                record.calories,
                record.steps as i64,
                record.started_at,
                record.finished_at,
                program,
                record.notes,
            ],
        )?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO workout_routes (
                workout_id, compressed_data, original_size, point_count, compression_ratio
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                id,
                route.compressed_data,
                route.original_size as i64,
                route.point_count as i64,
                route.compression_ratio(),
            ],
        )?;
        tx.commit()?;

        tracing::debug!(id = %id, points = route.point_count, ratio = route.compression_ratio(), "Stored workout");
        Ok(id)
    }

    fn fetch_by_user(&self, user_id: &str) -> Result<Vec<WorkoutRecord>, StorageError> {
        let query = format!(
            "{} WHERE w.user_id = ?1 ORDER BY w.started_at DESC",
            SELECT_WORKOUTS
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map(params![user_id], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::into_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn record(user: Option<&str>, minutes_after: i64) -> WorkoutRecord {
        let started_at = Utc.with_ymd_and_hms(2024, 3, 10, 7, 0, 0).unwrap()
            + Duration::minutes(minutes_after);
        WorkoutRecord {
            id: None,
            user_id: user.map(str::to_string),
            workout_type: WorkoutType::Running,
            distance_m: 5012.4,
            duration_secs: 1560,
            pace_secs_per_km: Some(311.2),
            avg_speed_kmh: 11.57,
            calories: 364.0,
            steps: 6120,
            route: (0..200)
                .map(|i| RoutePoint {
                    latitude: 48.0 + i as f64 * 1e-4,
                    longitude: 11.0,
                })
                .collect(),
            started_at,
            finished_at: started_at + Duration::seconds(1560),
            program: None,
            notes: String::new(),
        }
    }

    #[test]
    fn test_route_compression() {
        let route = record(Some("u1"), 0).route;
        let compressed = CompressedRoute::compress(&route).unwrap();
        assert_eq!(compressed.point_count, 200);
        assert!(compressed.compression_ratio() > 1.0);
        assert_eq!(compressed.decompress().unwrap(), route);
    }

    #[test]
    fn test_save_and_load() {
        let mut store = SqliteWorkoutStore::in_memory().unwrap();
        let mut original = record(Some("u1"), 0);
        original.program = Some(ProgramSlot {
            program_id: "couch-to-5k".into(),
            user_program_id: "up-1".into(),
            week_index: 2,
            workout_index: 1,
        });

        let id = store.save(&original).unwrap();
        let loaded = store.load(&id).unwrap().unwrap();

        assert_eq!(loaded, original.with_id(id));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_anonymous_save_refused() {
        let mut store = SqliteWorkoutStore::in_memory().unwrap();
        assert!(matches!(
            store.save(&record(None, 0)),
            Err(StorageError::NotAuthenticated)
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_local_ids_are_replaced() {
        let mut store = SqliteWorkoutStore::in_memory().unwrap();
        let pending = record(Some("u1"), 0).with_id("local_1710054000000");
        let id = store.save(&pending).unwrap();
        assert!(!id.starts_with("local_"));
    }

    #[test]
    fn test_fetch_by_user_newest_first() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("workouts.db");
        {
            let mut store = SqliteWorkoutStore::open(&db_path).unwrap();
            store.save(&record(Some("u1"), 0)).unwrap();
            store.save(&record(Some("u1"), 120)).unwrap();
            store.save(&record(Some("u2"), 60)).unwrap();
        }

        let store = SqliteWorkoutStore::open(&db_path).unwrap();
        let history = store.fetch_by_user("u1").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].started_at > history[1].started_at);
        assert_eq!(store.fetch_recent(1).unwrap().len(), 1);
    }
}
