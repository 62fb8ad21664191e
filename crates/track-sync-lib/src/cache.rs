//! Persistent geometry cache keyed by track content hash
//!
//! The cache is best-effort. Every storage failure is logged and swallowed: reads
//! degrade to misses and writes to no-ops, so the rest of the system stays correct
//! (only slower) without persistence. Which strategy is active is decided once, by
//! [`open_geometry_cache`].

use crate::CachedGeometry;
use crate::storage::{FileStorage, SqliteStorage, StorageBackend};
use std::path::PathBuf;
use std::sync::Arc;

/// Storage key prefix for cached geometries
const KEY_PREFIX: &str = "geometry:";

fn storage_key(hash: &str) -> String {
    format!("{KEY_PREFIX}{hash}")
}

/// Best-effort geometry cache.
///
/// None of these operations can fail from the caller's point of view.
pub trait GeometryCache: Send + Sync {
    /// Entries for the given hashes. Misses are omitted.
    fn get(&self, hashes: &[String]) -> Vec<CachedGeometry>;

    /// Upsert entries by hash. A later write with the same hash replaces the earlier one.
    fn set_many(&self, entries: Vec<CachedGeometry>);

    fn delete_many(&self, hashes: &[String]);

    fn clear(&self);

    /// Number of cached geometries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Always-miss cache used when persistence is unavailable
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGeometryCache;

impl GeometryCache for NoopGeometryCache {
    fn get(&self, _hashes: &[String]) -> Vec<CachedGeometry> {
        Vec::new()
    }

    fn set_many(&self, _entries: Vec<CachedGeometry>) {}

    fn delete_many(&self, _hashes: &[String]) {}

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}

/// Cache backed by a [`StorageBackend`], one JSON value per hash
pub struct PersistentGeometryCache<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> PersistentGeometryCache<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn geometry_keys(&self) -> Vec<String> {
        match self.backend.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| k.starts_with(KEY_PREFIX))
                .collect(),
            Err(e) => {
                tracing::warn!("Geometry cache key listing failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<B: StorageBackend> GeometryCache for PersistentGeometryCache<B> {
    fn get(&self, hashes: &[String]) -> Vec<CachedGeometry> {
        if hashes.is_empty() {
            return Vec::new();
        }

        let keys: Vec<String> = hashes.iter().map(|h| storage_key(h)).collect();
        let values = match self.backend.get_many(&keys) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Geometry cache read failed, treating as miss: {}", e);
                return Vec::new();
            }
        };

        values
            .into_iter()
            .zip(hashes)
            .filter_map(|(value, hash)| {
                let value = value?;
                match serde_json::from_str::<CachedGeometry>(&value) {
                    Ok(entry) if entry.hash == *hash => Some(entry),
                    Ok(entry) => {
                        tracing::warn!(
                            "Geometry cache entry under {} carries hash {}, ignoring",
                            hash,
                            entry.hash
                        );
                        None
                    }
                    Err(e) => {
                        tracing::warn!("Corrupt geometry cache entry for {}: {}", hash, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn set_many(&self, entries: Vec<CachedGeometry>) {
        let mut pairs = Vec::with_capacity(entries.len());
        for entry in &entries {
            match serde_json::to_string(entry) {
                Ok(json) => pairs.push((storage_key(&entry.hash), json)),
                Err(e) => tracing::warn!("Failed to encode geometry {}: {}", entry.hash, e),
            }
        }

        if let Err(e) = self.backend.set_many(&pairs) {
            tracing::warn!("Geometry cache write of {} entries failed: {}", pairs.len(), e);
        }
    }

    fn delete_many(&self, hashes: &[String]) {
        let keys: Vec<String> = hashes.iter().map(|h| storage_key(h)).collect();
        if let Err(e) = self.backend.remove_many(&keys) {
            tracing::warn!("Geometry cache delete failed: {}", e);
        }
    }

    fn clear(&self) {
        let keys = self.geometry_keys();
        if let Err(e) = self.backend.remove_many(&keys) {
            tracing::warn!("Geometry cache clear failed: {}", e);
        }
    }

    fn len(&self) -> usize {
        self.geometry_keys().len()
    }
}

/// Per-user location of the geometry cache database
pub fn default_cache_path() -> PathBuf {
    FileStorage::default_storage_path().with_file_name("geometry-cache.sqlite")
}

/// Select the cache strategy for this process.
///
/// Opens a SQLite-backed cache at `path` (or [`default_cache_path`]). A damaged
/// database is replaced by an empty one. If the database cannot be opened at
/// all, an always-miss cache is returned instead.
pub fn open_geometry_cache(path: Option<PathBuf>) -> Arc<dyn GeometryCache> {
    let path = path.unwrap_or_else(default_cache_path);
    match SqliteStorage::open(&path) {
        Ok(storage) => {
            tracing::info!(path = %path.display(), "Geometry cache enabled");
            Arc::new(PersistentGeometryCache::new(storage))
        }
        Err(e) => {
            tracing::warn!("Geometry cache unavailable, continuing without it: {}", e);
            Arc::new(NoopGeometryCache)
        }
    }
}
