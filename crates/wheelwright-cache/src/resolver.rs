//! Cache key resolution against a store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use wheelwright_core::Result;
use wheelwright_core::workflow::CacheDefinition;

use crate::keys::derive_key;
use crate::store::CacheStore;

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    /// The primary key that was looked up.
    pub key: String,
    /// The key that actually matched, if any.
    pub matched_key: Option<String>,
    /// Entry payload on a hit.
    pub data: Option<Vec<u8>>,
    /// True when the match came from a restore prefix rather than the
    /// primary key.
    pub partial: bool,
}

impl CacheHandle {
    fn miss(key: String) -> Self {
        Self {
            key,
            matched_key: None,
            data: None,
            partial: false,
        }
    }

    pub fn hit(&self) -> bool {
        self.data.is_some()
    }
}

/// Resolves a workflow's cache definition to entries in a store.
pub struct CacheResolver {
    store: Arc<dyn CacheStore>,
    namespace: String,
    key_files: Vec<PathBuf>,
    restore_keys: Vec<String>,
    paths: Vec<PathBuf>,
    base_dir: PathBuf,
}

impl CacheResolver {
    pub fn new(
        store: Arc<dyn CacheStore>,
        definition: &CacheDefinition,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            namespace: definition.namespace.clone(),
            key_files: definition.key_files.clone(),
            restore_keys: definition.restore_keys.clone(),
            paths: definition.paths.clone(),
            base_dir,
        }
    }

    /// Directories this cache packs and restores.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The primary key for the current key file contents.
    pub fn primary_key(&self) -> String {
        let resolved: Vec<PathBuf> = self
            .key_files
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.base_dir.join(p)
                }
            })
            .collect();
        let refs: Vec<&Path> = resolved.iter().map(PathBuf::as_path).collect();
        derive_key(&self.namespace, &refs)
    }

    fn effective_restore_keys(&self) -> Vec<String> {
        if self.restore_keys.is_empty() {
            vec![format!("{}-", self.namespace)]
        } else {
            self.restore_keys.clone()
        }
    }

    /// Look up the primary key, then each restore prefix in order.
    ///
    /// A miss yields an empty handle, never an error: steps start cold
    /// when nothing usable is stored.
    pub async fn resolve(&self) -> Result<CacheHandle> {
        let key = self.primary_key();
        if let Some(data) = self.store.get(&key).await? {
            info!(key = %key, "cache hit");
            return Ok(CacheHandle {
                matched_key: Some(key.clone()),
                data: Some(data),
                partial: false,
                key,
            });
        }

        for prefix in self.effective_restore_keys() {
            let mut candidates = self.store.list(&prefix).await?;
            // Keys embed content hashes, so order is only a heuristic;
            // reverse lexicographic picks a stable candidate.
            candidates.sort();
            candidates.reverse();
            for candidate in candidates {
                if let Some(data) = self.store.get(&candidate).await? {
                    info!(key = %key, matched = %candidate, "partial cache hit");
                    return Ok(CacheHandle {
                        key,
                        matched_key: Some(candidate),
                        data: Some(data),
                        partial: true,
                    });
                }
            }
        }

        debug!(key = %key, "cache miss");
        Ok(CacheHandle::miss(key))
    }

    /// Store data under the primary key.
    pub async fn save(&self, data: Vec<u8>) -> Result<()> {
        let key = self.primary_key();
        let size_bytes = data.len();
        self.store.put(&key, data).await?;
        info!(key = %key, size_bytes, "cache entry saved");
        Ok(())
    }
}
