//! Crash-recovery snapshot of the tracker's in-flight entries.
//!
//! The snapshot is a cache of in-memory state, not historical truth. It is
//! stored as a versioned JSON document and replaced atomically (write to a
//! sibling temp file, then rename) after every accepted transition.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ActiveEntry;

/// Current on-disk format version.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt snapshot {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported snapshot version {found} in {}", .path.display())]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

/// In-flight tracker state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub active_entries: BTreeMap<String, ActiveEntry>,
    pub last_active: Option<ActiveEntry>,
    /// Set while tracking is paused. Absent in files written before pausing
    /// existed, which load as not paused.
    #[serde(default)]
    pub paused: bool,
}

#[derive(Serialize)]
struct SnapshotFileRef<'a> {
    version: u32,
    #[serde(flatten)]
    snapshot: &'a TrackerSnapshot,
}

#[derive(Deserialize)]
struct SnapshotFile {
    version: u32,
    #[serde(flatten)]
    snapshot: TrackerSnapshot,
}

/// Reads and writes the snapshot file for one tracker instance.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot path conventionally kept next to a database file.
    pub fn beside(database_path: &Path) -> Self {
        let mut path = database_path.as_os_str().to_owned();
        path.push(".state");
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot.
    ///
    /// Returns `None` if the file doesn't exist (first run).
    /// Returns an error if the file exists but is unreadable or unparseable.
    pub fn load(&self) -> Result<Option<TrackerSnapshot>, SnapshotError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let file: SnapshotFile =
            serde_json::from_slice(&content).map_err(|source| SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if file.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                path: self.path.clone(),
                found: file.version,
            });
        }
        Ok(Some(file.snapshot))
    }

    /// Atomically replaces the snapshot file.
    pub fn save(&self, snapshot: &TrackerSnapshot) -> Result<(), SnapshotError> {
        let io_err = |source: std::io::Error| SnapshotError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let body = serde_json::to_vec(&SnapshotFileRef {
            version: SNAPSHOT_VERSION,
            snapshot,
        })
        .map_err(|source| SnapshotError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&body).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut path = self.path.as_os_str().to_owned();
        path.push(".tmp");
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::types::{EngineTag, PlatformTag};

    fn sample() -> TrackerSnapshot {
        let entry = ActiveEntry {
            tab_id: "tab-1".to_string(),
            url: "https://a.com".to_string(),
            engine_tag: EngineTag::GeckoDesktop,
            platform_tag: PlatformTag::Desktop,
            start_time: Utc::now(),
        };
        let mut active_entries = BTreeMap::new();
        active_entries.insert(entry.tab_id.clone(), entry.clone());
        TrackerSnapshot {
            active_entries,
            last_active: Some(entry),
            paused: false,
        }
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("activity.db.state"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested").join("activity.db.state"));
        let snapshot = sample();

        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("activity.db.state"));
        fs::write(store.path(), b"corrupted data").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("activity.db.state"));
        fs::write(
            store.path(),
            br#"{"version":99,"active_entries":{},"last_active":null}"#,
        )
        .unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[test]
    fn file_without_paused_flag_loads_as_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("activity.db.state"));
        fs::write(
            store.path(),
            br#"{"version":1,"active_entries":{},"last_active":null}"#,
        )
        .unwrap();

        let snapshot = store.load().unwrap().unwrap();
        assert!(!snapshot.paused);
    }

    #[test]
    fn beside_appends_state_suffix() {
        let store = SnapshotStore::beside(Path::new("/data/activity.db"));
        assert_eq!(store.path(), Path::new("/data/activity.db.state"));
    }
}
