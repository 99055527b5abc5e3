//! Atomic JSON record store
//!
//! A store is one file holding a JSON array of records. Every mutation
//! loads the whole array, edits it in memory and writes it back through a
//! temp file that is renamed over the target, so readers never observe a
//! half-written file. A per-store mutex serializes all operations against
//! the underlying file.

use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// A persisted record with an identity key used for de-duplication
pub trait Record: Serialize + DeserializeOwned + Clone + Send {
    /// Identity of a record within its store
    type Key: PartialEq;

    /// Identity key of this record
    fn key(&self) -> Self::Key;
}

/// File-backed set of records of type `T`
pub struct JsonStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> JsonStore<T> {
    /// Create a store backed by `path`. Nothing touches the disk until the
    /// first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record. A missing file is an empty store.
    pub fn load_all(&self) -> Result<Vec<T>, StoreError> {
        let _guard = self.guard()?;
        self.read_unlocked()
    }

    /// Insert `record`, replacing any record with the same key
    pub fn save(&self, record: T) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let mut records = self.read_unlocked()?;
        let key = record.key();

        match records.iter_mut().find(|r| r.key() == key) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }

        self.write_unlocked(&records)
    }

    /// Remove every record whose key equals `key`. Returns how many were removed.
    pub fn delete(&self, key: &T::Key) -> Result<usize, StoreError> {
        self.delete_where(|r| r.key() == *key)
    }

    /// Remove every record matching `predicate`. Returns how many were removed.
    pub fn delete_where<F>(&self, predicate: F) -> Result<usize, StoreError>
    where
        F: Fn(&T) -> bool,
    {
        let _guard = self.guard()?;
        let records = self.read_unlocked()?;
        let before = records.len();
        let kept: Vec<T> = records.into_iter().filter(|r| !predicate(r)).collect();
        let removed = before - kept.len();

        if removed > 0 {
            self.write_unlocked(&kept)?;
        }
        Ok(removed)
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.lock
            .lock()
            .map_err(|_| StoreError::Poisoned(self.path.clone()))
    }

    fn read_unlocked(&self) -> Result<Vec<T>, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&content).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn write_unlocked(&self, records: &[T]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let tmp_path = self.tmp_path();
        let result = write_synced(&tmp_path, &json).and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                tracing::debug!("Failed to remove temp file {:?}: {}", tmp_path, cleanup);
            }
            return Err(self.io_error(e));
        }

        tracing::trace!("Wrote {} records to {:?}", records.len(), self.path);
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobId, ProxyKey, ProxyMeta, SubmitJobInfo};
    use tempfile::TempDir;

    fn meta(job: u32, node: &str, container_port: u16, proxy_port: u16) -> ProxyMeta {
        ProxyMeta::new(
            format!("job-{}", job),
            &ProxyKey::new(JobId(job), node, container_port),
            proxy_port,
        )
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store: JsonStore<ProxyMeta> = JsonStore::new(dir.path().join("absent.json"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("nested/dir/proxy.json"));

        let m = meta(1, "node01", 8080, 30001);
        store.save(m.clone()).unwrap();

        assert_eq!(store.load_all().unwrap(), vec![m]);
    }

    #[test]
    fn test_save_same_key_replaces() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("proxy.json"));

        store.save(meta(1, "node01", 8080, 30001)).unwrap();
        store.save(meta(1, "node01", 8080, 30002)).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].proxy_port, 30002);
    }

    #[test]
    fn test_delete_removes_only_matching() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("proxy.json"));

        let keep = meta(2, "node02", 9000, 30003);
        store.save(meta(1, "node01", 8080, 30001)).unwrap();
        store.save(keep.clone()).unwrap();

        let removed = store
            .delete(&ProxyKey::new(JobId(1), "node01", 8080))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.load_all().unwrap(), vec![keep]);
    }

    #[test]
    fn test_delete_absent_key_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let store: JsonStore<SubmitJobInfo> = JsonStore::new(dir.path().join("jobs.json"));

        assert_eq!(store.delete(&"nope".to_string()).unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("proxy.json"));
        store.save(meta(1, "node01", 8080, 30001)).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["proxy.json".to_string()]);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxy.json");
        std::fs::write(&path, "{not json").unwrap();

        let store: JsonStore<ProxyMeta> = JsonStore::new(path);
        assert!(matches!(store.load_all(), Err(StoreError::Json { .. })));
    }
}
