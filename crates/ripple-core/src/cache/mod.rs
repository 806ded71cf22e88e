//! Per-directory peak cache
//!
//! Each audio directory holds one JSON index (`.ripple-peaks.json` by
//! default) mapping file names to their cached peaks:
//!
//! ```text
//! {
//!   "take1.wav": {
//!     "signature": { "size": 882044, "mtime": 1718000000000 },
//!     "peaks": [[-0.41, 0.39], ...],
//!     "durationMs": 10000,
//!     "columnCount": 2000
//!   }
//! }
//! ```
//!
//! An entry is only served while the file's size and mtime still match and
//! the requested column count is the same. A corrupt index is logged and
//! treated as empty; the next save replaces it.
//!
//! Writes to one directory are serialized through an in-process lock and
//! land atomically (temp file in the same directory, then rename), so a
//! reader never sees a half-written index.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::DEFAULT_CACHE_FILE_NAME;
use crate::error::{EngineError, EngineResult};
use crate::types::{AudioFileRef, FileSignature, PeakArtifact};

/// One cached file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub signature: FileSignature,
    pub peaks: Vec<(f32, f32)>,
    pub duration_ms: u64,
    pub column_count: usize,
}

impl CacheEntry {
    fn from_artifact(signature: FileSignature, artifact: &PeakArtifact) -> Self {
        Self {
            signature,
            peaks: artifact.peaks.clone(),
            duration_ms: artifact.duration_ms,
            column_count: artifact.column_count,
        }
    }

    fn into_artifact(self) -> PeakArtifact {
        PeakArtifact {
            peaks: self.peaks,
            duration_ms: self.duration_ms,
            column_count: self.column_count,
        }
    }
}

/// Full contents of one directory index, sorted by file name
pub type CacheIndex = BTreeMap<String, CacheEntry>;

/// Reads and writes per-directory peak indexes
pub struct CacheStore {
    file_name: String,
    /// One write lock per directory
    dir_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            dir_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Location of the index document for `dir`
    pub fn index_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.file_name)
    }

    /// Cached peaks for `file`, if the entry still matches
    pub fn load(&self, file: &AudioFileRef, column_count: usize) -> Option<PeakArtifact> {
        let name = file.file_name()?;
        let dir = file.directory();
        let mut index = self.read_index(&dir);

        let entry = index.remove(&name)?;
        if entry.signature != file.signature() {
            log::debug!(
                "[CACHE] Stale entry for {:?}: cached {:?}, live {:?}",
                file.path(),
                entry.signature,
                file.signature()
            );
            return None;
        }
        if entry.column_count != column_count {
            log::debug!(
                "[CACHE] Column count mismatch for {:?}: cached {}, requested {}",
                file.path(),
                entry.column_count,
                column_count
            );
            return None;
        }

        log::debug!("[CACHE] Hit for {:?}", file.path());
        Some(entry.into_artifact())
    }

    /// Store (or replace) the entry for `file`
    pub fn save(&self, file: &AudioFileRef, artifact: &PeakArtifact) -> EngineResult<()> {
        let name = file_key(file)?;
        let dir = file.directory();

        let lock = self.dir_lock(&dir);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut index = self.read_index(&dir);
        index.insert(name, CacheEntry::from_artifact(file.signature(), artifact));
        self.write_index(&dir, &index)?;

        log::debug!(
            "[CACHE] Saved {} columns for {:?}",
            artifact.peaks.len(),
            file.path()
        );
        Ok(())
    }

    /// Drop the entry for `file`; returns whether one existed
    pub fn remove(&self, file: &AudioFileRef) -> EngineResult<bool> {
        let name = file_key(file)?;
        let dir = file.directory();

        let lock = self.dir_lock(&dir);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut index = self.read_index(&dir);
        if index.remove(&name).is_none() {
            return Ok(false);
        }
        self.write_index(&dir, &index)?;
        Ok(true)
    }

    /// Remove entries whose files no longer exist in `dir`
    ///
    /// Returns the number of entries removed. Leaves the index untouched if
    /// nothing needs pruning.
    pub fn prune(&self, dir: &Path) -> EngineResult<usize> {
        let lock = self.dir_lock(dir);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut index = self.read_index(dir);
        let before = index.len();
        index.retain(|name, _| dir.join(name).is_file());
        let removed = before - index.len();

        if removed > 0 {
            self.write_index(dir, &index)?;
            log::info!("[CACHE] Pruned {} stale entries from {:?}", removed, dir);
        }
        Ok(removed)
    }

    /// Parse the index for `dir`, treating anything unreadable as empty
    pub fn read_index(&self, dir: &Path) -> CacheIndex {
        let path = self.index_path(dir);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheIndex::new(),
            Err(e) => {
                let err = EngineError::CacheCorrupt {
                    path,
                    reason: e.to_string(),
                };
                log::warn!("[CACHE] {}, ignoring", err);
                return CacheIndex::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(index) => index,
            Err(e) => {
                let err = EngineError::CacheCorrupt {
                    path,
                    reason: e.to_string(),
                };
                log::warn!("[CACHE] {}, treating as empty", err);
                CacheIndex::new()
            }
        }
    }

    fn write_index(&self, dir: &Path, index: &CacheIndex) -> EngineResult<()> {
        let mut temp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, index)?;
            writer.flush()?;
        }
        temp.persist(self.index_path(dir)).map_err(|e| e.error)?;
        Ok(())
    }

    fn dir_lock(&self, dir: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .dir_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_FILE_NAME)
    }
}

fn file_key(file: &AudioFileRef) -> EngineResult<String> {
    file.file_name().ok_or_else(|| EngineError::CacheCorrupt {
        path: file.path().to_path_buf(),
        reason: "path has no file name".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(columns: usize) -> PeakArtifact {
        PeakArtifact {
            peaks: (0..columns).map(|i| (-(i as f32) / 10.0, i as f32 / 10.0)).collect(),
            duration_ms: 1234,
            column_count: columns,
        }
    }

    fn file_in(dir: &Path, name: &str, size: u64, mtime: u64) -> AudioFileRef {
        AudioFileRef::from_parts(dir.join(name), FileSignature { size, mtime })
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::default();
        let file = file_in(dir.path(), "a.wav", 100, 5);

        store.save(&file, &artifact(4)).unwrap();
        assert_eq!(store.load(&file, 4), Some(artifact(4)));
        assert!(store.index_path(dir.path()).exists());
    }

    #[test]
    fn test_index_uses_camel_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::default();
        store.save(&file_in(dir.path(), "a.wav", 1, 2), &artifact(2)).unwrap();

        let raw = std::fs::read_to_string(store.index_path(dir.path())).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &json["a.wav"];
        assert_eq!(entry["durationMs"], 1234);
        assert_eq!(entry["columnCount"], 2);
        assert_eq!(entry["signature"]["size"], 1);
        assert_eq!(entry["peaks"][1][1].as_f64().unwrap() as f32, 0.1);
    }

    #[test]
    fn test_signature_mismatch_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::default();
        store.save(&file_in(dir.path(), "a.wav", 100, 5), &artifact(4)).unwrap();

        assert!(store.load(&file_in(dir.path(), "a.wav", 101, 5), 4).is_none());
        assert!(store.load(&file_in(dir.path(), "a.wav", 100, 6), 4).is_none());
    }

    #[test]
    fn test_column_count_mismatch_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::default();
        let file = file_in(dir.path(), "a.wav", 100, 5);
        store.save(&file, &artifact(4)).unwrap();

        assert!(store.load(&file, 8).is_none());
    }

    #[test]
    fn test_corrupt_index_is_empty_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::default();
        std::fs::write(store.index_path(dir.path()), "{ not json").unwrap();

        let file = file_in(dir.path(), "a.wav", 100, 5);
        assert!(store.load(&file, 4).is_none());

        store.save(&file, &artifact(4)).unwrap();
        assert_eq!(store.load(&file, 4), Some(artifact(4)));
    }

    #[test]
    fn test_concurrent_saves_keep_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::default());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let dir = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let file = file_in(&dir, &format!("f{}.wav", i), i, i);
                    store.save(&file, &artifact(3)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.read_index(dir.path()).len(), 8);
    }

    #[test]
    fn test_remove_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::default();

        let kept = dir.path().join("kept.wav");
        std::fs::write(&kept, b"x").unwrap();
        store.save(&file_in(dir.path(), "kept.wav", 1, 1), &artifact(2)).unwrap();
        store.save(&file_in(dir.path(), "gone.wav", 1, 1), &artifact(2)).unwrap();
        store.save(&file_in(dir.path(), "other.wav", 1, 1), &artifact(2)).unwrap();

        assert!(store.remove(&file_in(dir.path(), "other.wav", 1, 1)).unwrap());
        assert!(!store.remove(&file_in(dir.path(), "other.wav", 1, 1)).unwrap());

        assert_eq!(store.prune(dir.path()).unwrap(), 1);
        let index = store.read_index(dir.path());
        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["kept.wav"]);
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let store = CacheStore::default();
        let file = file_in(Path::new("/nonexistent/ripple"), "a.wav", 1, 1);
        assert!(matches!(store.save(&file, &artifact(1)), Err(EngineError::Io(_))));
    }

    #[test]
    fn test_default_index_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::default();
        store.save(&file_in(dir.path(), "a.wav", 1, 1), &artifact(1)).unwrap();

        assert_eq!(store.index_path(dir.path()), dir.path().join(DEFAULT_CACHE_FILE_NAME));
        assert!(dir.path().join(".ripple-peaks.json").is_file());
    }
}
