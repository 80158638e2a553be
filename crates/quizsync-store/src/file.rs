//! Directory-backed key-value store.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;

use quizsync_core::error::StoreError;
use quizsync_core::traits::PersistentStore;

use crate::keys;

/// A [`PersistentStore`] keeping one file per key under a directory.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so a crash mid-write leaves either the old value or the new one.
/// Writers in this process are serialized; other processes sharing the
/// directory are not coordinated with.
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            StoreError::Unavailable(format!("cannot create {}: {e}", root.display()))
        })?;
        tracing::debug!(root = %root.display(), "file store opened");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(keys::encode(key))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// ENOSPC and EDQUOT on Linux.
const QUOTA_ERRNOS: [i32; 2] = [28, 122];

fn io_error(key: &str, action: &str, err: std::io::Error) -> StoreError {
    match err.raw_os_error() {
        Some(code) if QUOTA_ERRNOS.contains(&code) => StoreError::QuotaExceeded(key.to_string()),
        _ => StoreError::Io(format!("{action} '{key}': {err}")),
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, "read", e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(|e| io_error(key, "write", e))?;
        tmp.write_all(value.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| io_error(key, "write", e))?;
        tmp.persist(self.path_for(key))
            .map_err(|e| io_error(key, "write", e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock();
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, "remove", e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.root.display())))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(key) = entry.file_name().to_str().and_then(keys::decode) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
