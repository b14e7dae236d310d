//! Key-value storage that survives process restarts.
//!
//! The draft cache and the session context both sit on top of a
//! [`KeyValueStore`]. Values are opaque strings (JSON in practice).

pub mod draft_cache;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs;

pub use draft_cache::{CachedDraft, DraftCache, DRAFT_SCHEMA_VERSION, DRAFT_STORAGE_KEY};

/// Errors from the key-value layer
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist {key}: {source}")]
    Persist {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// String-keyed persistent storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// One file per key under a directory. Writes are atomic (temp file + rename).
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).await?;

        let dir = self.dir.clone();
        let path = self.path_for(key);
        let key = key.to_string();
        let value = value.to_string();

        tokio::task::spawn_blocking(move || -> Result<(), CacheError> {
            use std::io::Write;

            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(value.as_bytes())?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| CacheError::Persist {
                key,
                source: e.error,
            })?;
            Ok(())
        })
        .await?
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp.path().join("cache"));

        assert_eq!(store.get("memoiries:captureDraft").await.unwrap(), None);

        store.set("memoiries:captureDraft", "{\"a\":1}").await.unwrap();
        assert_eq!(
            store.get("memoiries:captureDraft").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        store.set("memoiries:captureDraft", "{\"a\":2}").await.unwrap();
        assert_eq!(
            store.get("memoiries:captureDraft").await.unwrap().as_deref(),
            Some("{\"a\":2}")
        );
    }

    #[tokio::test]
    async fn test_file_store_key_sanitizing() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp.path());

        assert_eq!(
            store.path_for("memoiries.activeOwner"),
            temp.path().join("memoiries_activeOwner.json")
        );
    }

    #[tokio::test]
    async fn test_remove_missing_key_is_ok() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp.path());
        store.remove("nothing-here").await.unwrap();

        let memory = MemoryKeyValueStore::new();
        memory.remove("nothing-here").await.unwrap();
    }
}
