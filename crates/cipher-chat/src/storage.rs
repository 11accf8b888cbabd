use crate::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Key/value persistence for device-local state.
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: String) -> Result<()>;
    fn del(&self, key: &str) -> Result<()>;
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct InMemoryStorage {
    store: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.store).get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        lock(&self.store).insert(key.to_string(), value);
        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        lock(&self.store).remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = lock(&self.store)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// One file per key under `base_path`. Writes go through a temporary file and
/// a rename so a crash never leaves a truncated private key behind.
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path)
            .map_err(|e| Error::Storage(format!("Failed to create directory: {e}")))?;
        Ok(Self { base_path })
    }

    fn key_to_file_name(key: &str) -> String {
        format!("{}.json", key.replace(['/', '\\', ':'], "_"))
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_path.join(Self::key_to_file_name(key))
    }
}

impl StorageAdapter for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.key_to_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read {key}: {e}"))),
        }
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        let path = self.key_to_path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .map_err(|e| Error::Storage(format!("Failed to write {key}: {e}")))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Storage(format!("Failed to commit {key}: {e}")))
    }

    fn del(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.key_to_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete {key}: {e}"))),
        }
    }

    /// Keys come back in their sanitized form (`/` becomes `_`).
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let sanitized_prefix = prefix.replace(['/', '\\', ':'], "_");
        let entries = fs::read_dir(&self.base_path)
            .map_err(|e| Error::Storage(format!("Failed to read directory: {e}")))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::Storage(format!("Failed to read dir entry: {e}")))?;
            let file_name = entry.file_name();
            let Some(key) = file_name.to_string_lossy().strip_suffix(".json").map(str::to_string)
            else {
                continue;
            };
            if key.starts_with(&sanitized_prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
