//! Persisted per-symbol watermarks.
//!
//! Layout: a single JSON object `{ "<display_id>": "YYYY-MM-DD", ... }`.
//!
//! Reads are forgiving: a missing or corrupt file loads as an empty map, so
//! every symbol falls back to a full reprocess instead of blocking the batch.
//! Writes are not: a failed write means the watermark did not advance and
//! the caller gets the error.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Symbol → last successfully imported date.
pub type Watermarks = BTreeMap<String, NaiveDate>;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("create watermark directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialize watermarks: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write watermark file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Watermark log backed by a JSON file.
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    entries: Watermarks,
}

impl WatermarkStore {
    /// Open the store, loading whatever is on disk. Never fails.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load(&path);
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, display_id: &str) -> Option<NaiveDate> {
        self.entries.get(display_id).copied()
    }

    pub fn entries(&self) -> &Watermarks {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `date` for `display_id` and persist the whole map immediately.
    ///
    /// The in-memory entry is only changed once the file write succeeded.
    pub fn update(&mut self, display_id: &str, date: NaiveDate) -> Result<(), WatermarkError> {
        let mut next = self.entries.clone();
        next.insert(display_id.to_string(), date);
        self.persist(&next)?;
        self.entries = next;
        Ok(())
    }

    /// Drop the entry for `display_id`. Returns whether one existed.
    pub fn remove(&mut self, display_id: &str) -> Result<bool, WatermarkError> {
        if !self.entries.contains_key(display_id) {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next.remove(display_id);
        self.persist(&next)?;
        self.entries = next;
        Ok(true)
    }

    /// Write to `<path>.tmp`, then rename over the real file so readers never
    /// see a partial document.
    fn persist(&self, entries: &Watermarks) -> Result<(), WatermarkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| WatermarkError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp_path = tmp_path(&self.path);

        fs::write(&tmp_path, json).map_err(|source| WatermarkError::Write {
            path: tmp_path.clone(),
            source,
        })?;

        fs::rename(&tmp_path, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            WatermarkError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}

/// Load watermarks from `path`. Missing or malformed files yield an empty map.
pub fn load(path: &Path) -> Watermarks {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no watermark file, starting fresh");
            return Watermarks::new();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable watermark file, treating as empty");
            return Watermarks::new();
        }
    };

    match serde_json::from_str::<Watermarks>(&content) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "corrupt watermark file, every symbol will be fully reprocessed"
            );
            Watermarks::new()
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = WatermarkStore::open(dir.path().join("nope.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watermarks.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load(&path).is_empty());
    }

    #[test]
    fn bad_date_value_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watermarks.json");
        fs::write(&path, r#"{"EURUSD": "yesterday"}"#).unwrap();
        assert!(load(&path).is_empty());
    }

    #[test]
    fn update_creates_directory_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("watermarks.json");

        let mut store = WatermarkStore::open(&path);
        store.update("EURUSD", d(2023, 6, 1)).unwrap();

        assert!(path.exists());
        assert!(!tmp_path(&path).exists());

        let reopened = WatermarkStore::open(&path);
        assert_eq!(reopened.get("EURUSD"), Some(d(2023, 6, 1)));
    }

    #[test]
    fn update_overwrites_single_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watermarks.json");

        let mut store = WatermarkStore::open(&path);
        store.update("EURUSD", d(2023, 6, 1)).unwrap();
        store.update("GBPUSD", d(2023, 6, 1)).unwrap();
        store.update("EURUSD", d(2023, 6, 2)).unwrap();

        let on_disk = load(&path);
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk["EURUSD"], d(2023, 6, 2));
        assert_eq!(on_disk["GBPUSD"], d(2023, 6, 1));
    }

    #[test]
    fn file_format_is_plain_date_strings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watermarks.json");

        let mut store = WatermarkStore::open(&path);
        store.update("EURUSD", d(2023, 6, 1)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["EURUSD"], "2023-06-01");
    }

    #[test]
    fn remove_reports_presence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watermarks.json");

        let mut store = WatermarkStore::open(&path);
        store.update("EURUSD", d(2023, 6, 1)).unwrap();

        assert!(store.remove("EURUSD").unwrap());
        assert!(!store.remove("EURUSD").unwrap());
        assert!(load(&path).is_empty());
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let dir = TempDir::new().unwrap();
        // The store path is an existing directory, so the rename must fail.
        let path = dir.path().join("occupied");
        fs::create_dir_all(path.join("child")).unwrap();

        let mut store = WatermarkStore::open(&path);
        assert!(store.update("EURUSD", d(2023, 6, 1)).is_err());
        assert_eq!(store.get("EURUSD"), None);
    }
}
