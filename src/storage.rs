//! Persisted key/value storage shared by the session store and the Telegram
//! linking flow. This is the native counterpart of browser local storage: a flat
//! string map, last writer wins, no locking across processes.
//!
//! Values stored here are credentials. `FileStore` writes with 0600 permissions
//! on unix and nothing in this module logs values.

use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;
use tracing::debug;

/// Storage key for the bearer token.
pub const TOKEN_KEY: &str = "auth_token";
/// Storage key for a pending Telegram correlation token.
pub const CORRELATION_TOKEN_KEY: &str = "telegram_auth_token";
/// Storage key for the action (login or link) the correlation token belongs to.
pub const CORRELATION_ACTION_KEY: &str = "telegram_auth_action";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {path} is not a JSON object of strings")]
    Corrupt { path: String },
    #[error("storage encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns an error if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// JSON file store. Every operation re-reads the file so several `ccp`
/// invocations observe each other's writes.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<config dir>/ccp/session.json`, or `./ccp-session.json` when no config dir exists.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from("ccp-session.json"),
            |dir| dir.join("ccp").join("session.json"),
        )
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Map<String, Value>, StorageError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let contents = fs::read_to_string(&self.path).map_err(|source| StorageError::Io {
            path: self.display_path(),
            source,
        })?;

        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) if map.values().all(Value::is_string) => Ok(map),
            _ => Err(StorageError::Corrupt {
                path: self.display_path(),
            }),
        }
    }

    fn save(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.display_path(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let contents = serde_json::to_string_pretty(map)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .map_err(io_err)?;
            file.write_all(contents.as_bytes()).map_err(io_err)?;
        }

        #[cfg(not(unix))]
        {
            let mut file = fs::File::create(&self.path).map_err(io_err)?;
            file.write_all(contents.as_bytes()).map_err(io_err)?;
        }

        debug!("storage saved: {}", self.path.display());

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let map = self.load()?;
        Ok(map.get(key).and_then(Value::as_str).map(ToString::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut map = self.load()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.save(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut map = self.load()?;
        if map.remove(key).is_none() {
            return Ok(());
        }
        self.save(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn memory_store_round_trip() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.get(TOKEN_KEY)?, None);

        store.set(TOKEN_KEY, "token-1")?;
        store.set(TOKEN_KEY, "token-2")?;
        assert_eq!(store.get(TOKEN_KEY)?.as_deref(), Some("token-2"));

        store.remove(TOKEN_KEY)?;
        store.remove(TOKEN_KEY)?;
        assert_eq!(store.get(TOKEN_KEY)?, None);
        Ok(())
    }

    #[test]
    fn file_store_keeps_keys_independent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("session.json");
        let store = FileStore::new(&path);

        store.set(TOKEN_KEY, "bearer")?;
        store.set(CORRELATION_TOKEN_KEY, "correlation")?;
        store.remove(CORRELATION_TOKEN_KEY)?;

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get(TOKEN_KEY)?.as_deref(), Some("bearer"));
        assert_eq!(reopened.get(CORRELATION_TOKEN_KEY)?, None);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path().join("session.json"));
        store.set(TOKEN_KEY, "bearer")?;

        let mode = fs::metadata(store.path())?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn file_store_rejects_corrupt_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        fs::write(&path, "[1, 2, 3]")?;

        let store = FileStore::new(&path);
        let err = store.get(TOKEN_KEY).err();
        assert!(matches!(err, Some(StorageError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn file_store_missing_file_is_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get(TOKEN_KEY)?, None);
        store.remove(TOKEN_KEY)?;
        assert!(!store.path().exists());
        Ok(())
    }
}
