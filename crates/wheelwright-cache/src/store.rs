//! Cache storage backends.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use wheelwright_core::{Error, Result};

use crate::keys::sanitize_key;

/// A keyed blob store for cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Keys starting with the prefix, in no particular order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory store used by tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Filesystem-backed store, one file per key.
pub struct FsStore {
    root_dir: PathBuf,
}

impl FsStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(sanitize_key(key))
    }
}

#[async_trait]
impl CacheStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::CacheStore(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| Error::CacheStore(format!("failed to create cache dir: {}", e)))?;
        let path = self.key_path(key);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::CacheStore(format!("failed to write {}: {}", path.display(), e)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let sanitized = sanitize_key(prefix);
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => {
                return Err(Error::CacheStore(format!(
                    "failed to list cache dir: {}",
                    e
                )));
            }
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::CacheStore(e.to_string()))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(&sanitized) {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::CacheStore(format!(
                "failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
