//! Build-Time Store: invocation key -> newest path mtime after the last
//! successful run.
//!
//! Loaded once when a session opens and written back as a whole when it
//! closes. The file is a flat JSON object of hex keys to integer nanoseconds.

use crate::error::{BuildError, Result};
use crate::key::InvocationKey;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct BuildTimeStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, u64>>,
}

impl BuildTimeStore {
    /// Load the store at `path`. A missing file is normal on a first run; an
    /// unreadable one is discarded since rebuilding everything is always safe.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => {
                    info!("Build times loaded.");
                    records
                }
                Err(e) => {
                    warn!("Ignoring unreadable build times in {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "No last build times found. This is normal if you're running this for the first time."
                );
                BTreeMap::new()
            }
            Err(e) => return Err(BuildError::io(&path, "read", e)),
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// An empty store that will be written to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &InvocationKey) -> Option<u64> {
        self.records.lock().get(key.as_str()).copied()
    }

    pub fn record(&self, key: &InvocationKey, newest: u64) {
        self.records.lock().insert(key.as_str().to_string(), newest);
    }

    /// Forget `key` so the next submission runs regardless of mtimes.
    pub fn invalidate(&self, key: &InvocationKey) -> Option<u64> {
        self.records.lock().remove(key.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Write the whole map. The new file replaces the old one atomically.
    pub fn flush(&self) -> Result<()> {
        let snapshot = self.records.lock().clone();
        let content = serde_json::to_string(&snapshot).map_err(|source| BuildError::Encode {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, content.as_bytes())?;
        info!("wrote build times {}", self.path.display());
        Ok(())
    }
}

pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, "create directory", e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| BuildError::io(dir, "create temp file in", e))?;
    tmp.write_all(content)
        .map_err(|e| BuildError::io(tmp.path(), "write", e))?;
    tmp.persist(path)
        .map_err(|e| BuildError::io(path, "replace", e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuildTimeStore::load(dir.path().join("build_times.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("build_times.json");
        let key = InvocationKey::derive("cc -c a.c", Path::new("/src"));

        let store = BuildTimeStore::load(&path).unwrap();
        store.record(&key, 1_700_000_000_000_000_001);
        store.flush().unwrap();

        let reloaded = BuildTimeStore::load(&path).unwrap();
        assert_eq!(reloaded.get(&key), Some(1_700_000_000_000_000_001));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_file_format_is_flat_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build_times.json");
        let key = InvocationKey::derive("ar rvs lib.a", Path::new("/src"));
        let store = BuildTimeStore::empty(&path);
        store.record(&key, 42);
        store.flush().unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[key.as_str()], serde_json::json!(42));
    }

    #[test]
    fn test_invalidate_removes_record() {
        let store = BuildTimeStore::empty("unused.json");
        let key = InvocationKey::derive("false", Path::new("/"));
        store.record(&key, 7);
        assert_eq!(store.invalidate(&key), Some(7));
        assert_eq!(store.get(&key), None);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build_times.json");
        fs::write(&path, "{not json").unwrap();
        let store = BuildTimeStore::load(&path).unwrap();
        assert!(store.is_empty());
    }
}
