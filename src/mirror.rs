//! Best-effort local mirror of recent workouts
//!
//! Holds the most recent workouts per user (newest first) plus the last one
//! stored, so a record survives when the remote store is unreachable.

use crate::error::StorageError;
use crate::models::WorkoutRecord;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Prefix of ids assigned by the mirror
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Bucket used when no user is signed in
pub const ANONYMOUS_USER: &str = "anonymous";

pub const DEFAULT_CAPACITY: usize = 10;

pub trait LocalMirror {
    /// Keep a copy of `record`, returning the id it is filed under
    fn store(&mut self, record: &WorkoutRecord) -> Result<String, StorageError>;

    /// Drop a mirrored record. Returns true if it existed.
    fn remove(&mut self, user_id: Option<&str>, id: &str) -> Result<bool, StorageError>;

    /// Mirrored records of a user, newest first
    fn recent(&self, user_id: Option<&str>) -> Result<Vec<WorkoutRecord>, StorageError>;

    fn last_workout(&self, user_id: Option<&str>) -> Result<Option<WorkoutRecord>, StorageError>;
}

fn user_key(user_id: Option<&str>) -> String {
    user_id.unwrap_or(ANONYMOUS_USER).to_string()
}

/// Mirror contents, shared by the in-memory and file-backed mirrors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentWorkouts {
    capacity: usize,
    recent: HashMap<String, Vec<WorkoutRecord>>,
    last: HashMap<String, WorkoutRecord>,
}

impl RecentWorkouts {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent: HashMap::new(),
            last: HashMap::new(),
        }
    }

    pub fn insert(&mut self, record: &WorkoutRecord) -> String {
        let key = user_key(record.user_id.as_deref());
        let id = match &record.id {
            Some(id) => id.clone(),
            None => format!(
                "{}{}",
                LOCAL_ID_PREFIX,
                record.finished_at.timestamp_millis()
            ),
        };
        let stored = record.with_id(id.clone());

        let list = self.recent.entry(key.clone()).or_default();
        if !list.iter().any(|r| r.id.as_deref() == Some(id.as_str())) {
            list.insert(0, stored.clone());
            list.truncate(self.capacity.max(1));
        }
        self.last.insert(key, stored);
        id
    }

    pub fn remove(&mut self, user_id: Option<&str>, id: &str) -> bool {
        let key = user_key(user_id);
        let removed = match self.recent.get_mut(&key) {
            Some(list) => {
                let before = list.len();
                list.retain(|r| r.id.as_deref() != Some(id));
                list.len() != before
            }
            None => false,
        };
        if self.last.get(&key).and_then(|r| r.id.as_deref()) == Some(id) {
            self.last.remove(&key);
        }
        removed
    }

    pub fn recent(&self, user_id: Option<&str>) -> Vec<WorkoutRecord> {
        self.recent
            .get(&user_key(user_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn last(&self, user_id: Option<&str>) -> Option<WorkoutRecord> {
        self.last.get(&user_key(user_id)).cloned()
    }
}

/// Mirror kept in process memory; clones share contents
#[derive(Debug, Clone)]
pub struct MemoryMirror {
    inner: Rc<RefCell<RecentWorkouts>>,
}

impl MemoryMirror {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(RecentWorkouts::new(capacity))),
        }
    }

    pub fn snapshot(&self) -> RecentWorkouts {
        self.inner.borrow().clone()
    }
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LocalMirror for MemoryMirror {
    fn store(&mut self, record: &WorkoutRecord) -> Result<String, StorageError> {
        Ok(self.inner.borrow_mut().insert(record))
    }

    fn remove(&mut self, user_id: Option<&str>, id: &str) -> Result<bool, StorageError> {
        Ok(self.inner.borrow_mut().remove(user_id, id))
    }

    fn recent(&self, user_id: Option<&str>) -> Result<Vec<WorkoutRecord>, StorageError> {
        Ok(self.inner.borrow().recent(user_id))
    }

    fn last_workout(&self, user_id: Option<&str>) -> Result<Option<WorkoutRecord>, StorageError> {
        Ok(self.inner.borrow().last(user_id))
    }
}

/// Mirror persisted as a JSON document
#[derive(Debug, Clone)]
pub struct JsonFileMirror {
    path: PathBuf,
    capacity: usize,
}

impl JsonFileMirror {
    pub fn new<P: AsRef<Path>>(path: P, capacity: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mirror_error(&self, reason: impl ToString) -> StorageError {
        StorageError::Mirror {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn load(&self) -> Result<RecentWorkouts, StorageError> {
        if !self.path.exists() {
            return Ok(RecentWorkouts::new(self.capacity));
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.mirror_error(e))?;
        let mut contents: RecentWorkouts =
            serde_json::from_str(&content).map_err(|e| self.mirror_error(e))?;
        contents.capacity = self.capacity;
        Ok(contents)
    }

    fn persist(&self, contents: &RecentWorkouts) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.mirror_error(e))?;
        }
        let json = serde_json::to_string_pretty(contents).map_err(|e| self.mirror_error(e))?;
        fs::write(&self.path, json).map_err(|e| self.mirror_error(e))
    }
}

impl LocalMirror for JsonFileMirror {
    fn store(&mut self, record: &WorkoutRecord) -> Result<String, StorageError> {
        let mut contents = self.load()?;
        let id = contents.insert(record);
        self.persist(&contents)?;
        tracing::debug!(id = %id, path = %self.path.display(), "Mirrored workout locally");
        Ok(id)
    }

    fn remove(&mut self, user_id: Option<&str>, id: &str) -> Result<bool, StorageError> {
        let mut contents = self.load()?;
        let removed = contents.remove(user_id, id);
        if removed {
            self.persist(&contents)?;
        }
        Ok(removed)
    }

    fn recent(&self, user_id: Option<&str>) -> Result<Vec<WorkoutRecord>, StorageError> {
        Ok(self.load()?.recent(user_id))
    }

    fn last_workout(&self, user_id: Option<&str>) -> Result<Option<WorkoutRecord>, StorageError> {
        Ok(self.load()?.last(user_id))
    }
}
