// src/persistence/local.rs

use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use crate::error::PersistenceError;

/// Synchronous key-value storage with `localStorage` semantics.
pub trait LocalCache: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    fn remove_item(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Volatile in-process cache. Can simulate a storage quota and disabled
/// storage, the two ways browser storage refuses writes.
#[derive(Debug, Default)]
pub struct MemoryCache {
    items: Mutex<HashMap<String, String>>,
    /// Maximum total bytes across all values.
    quota: Option<usize>,
    disabled: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Self::default()
        }
    }

    /// While disabled every call fails with `Unavailable`.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    fn ensure_enabled(&self) -> Result<(), PersistenceError> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("storage is disabled".to_string()));
        }
        Ok(())
    }
}

impl LocalCache for MemoryCache {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.ensure_enabled()?;
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.ensure_enabled()?;
        let mut items = self.items.lock();
        if let Some(limit) = self.quota {
            let others: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let needed = others + value.len();
            if needed > limit {
                return Err(PersistenceError::QuotaExceeded { needed, limit });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), PersistenceError> {
        self.ensure_enabled()?;
        self.items.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory. Survives restarts.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl LocalCache for FileCache {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes through a temporary file so a crash never leaves half a snapshot.
    fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
