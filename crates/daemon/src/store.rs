//! Durable copies of the latest snapshot and the release cursors.
//!
//! Both files are JSON documents rewritten in full through a temporary file
//! and a rename, so a reader never observes a half-written file. A missing or
//! empty file reads as an empty collection.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use repowatch_core::{CursorMap, Entity};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub const SNAPSHOT_FILE: &str = "cache.json";
pub const CURSOR_FILE: &str = "state.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: malformed json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.dir.join(CURSOR_FILE)
    }

    pub fn read_snapshot(&self) -> Result<Vec<Entity>, StoreError> {
        read_json(&self.snapshot_path())
    }

    pub fn write_snapshot(&self, snapshot: &[Entity]) -> Result<(), StoreError> {
        write_json(&self.snapshot_path(), &snapshot)
    }

    pub fn read_cursors(&self) -> Result<CursorMap, StoreError> {
        read_json(&self.cursor_path())
    }

    pub fn write_cursors(&self, cursors: &CursorMap) -> Result<(), StoreError> {
        write_json(&self.cursor_path(), cursors)
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    // `null` decodes as the empty collection too.
    let value: Option<T> = serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(value.unwrap_or_default())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `bytes` to `path` via `<path>.tmp` and a rename. Creates the parent
/// directory when needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use repowatch_core::{CiStatus, Lifecycle, Release, ReleaseCursor};
    use tempfile::tempdir;

    fn sample() -> Vec<Entity> {
        vec![
            Entity {
                name: "alpha".into(),
                full_name: "me/alpha".into(),
                on_remote: true,
                ci_status: CiStatus::Failing,
                open_items: 3,
                topics: vec!["cli".into()],
                latest_release: Some(Release { tag: "v0.3.0".into(), published_at: None }),
                lifecycle: Lifecycle::Ongoing,
                ..Default::default()
            },
            Entity {
                name: "beta".into(),
                full_name: "beta".into(),
                cloned: true,
                local_path: "/src/beta".into(),
                branch: Some("main".into()),
                dirty: true,
                ..Default::default()
            },
        ]
    }

    #[test]
    fn missing_files_read_empty() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("not-yet-created"));
        assert!(store.read_snapshot().unwrap().is_empty());
        assert!(store.read_cursors().unwrap().is_empty());
    }

    #[test]
    fn empty_and_null_files_read_empty() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        fs::write(store.snapshot_path(), "").unwrap();
        fs::write(store.cursor_path(), "null").unwrap();
        assert!(store.read_snapshot().unwrap().is_empty());
        assert!(store.read_cursors().unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trips_byte_for_byte() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("state"));
        store.write_snapshot(&sample()).unwrap();
        let first = fs::read(store.snapshot_path()).unwrap();

        let back = store.read_snapshot().unwrap();
        assert_eq!(back, sample());
        store.write_snapshot(&back).unwrap();
        assert_eq!(fs::read(store.snapshot_path()).unwrap(), first);
    }

    #[test]
    fn cursors_round_trip() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let mut cursors = CursorMap::new();
        cursors.insert("b".into(), ReleaseCursor { last_seen_release_tag: "v2".into() });
        cursors.insert("a".into(), ReleaseCursor { last_seen_release_tag: "v1".into() });
        store.write_cursors(&cursors).unwrap();
        let first = fs::read(store.cursor_path()).unwrap();
        let back = store.read_cursors().unwrap();
        assert_eq!(back, cursors);
        store.write_cursors(&back).unwrap();
        assert_eq!(fs::read(store.cursor_path()).unwrap(), first);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        fs::write(store.snapshot_path(), "{not json").unwrap();
        assert!(matches!(store.read_snapshot(), Err(StoreError::Json { .. })));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.json");
        write_atomic(&path, b"[]").unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("x.json.tmp").exists());
    }
}
