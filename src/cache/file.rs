//! File-based listing cache with atomic writes.
//!
//! Stores one record per cache key under `dirs::cache_dir()/<namespace>/`
//! (falling back to the data directory). File names are the SHA-256 of the
//! cache key so user and application ids never appear on disk. Writes go
//! to a temp file and are renamed into place.

use crate::cache::format::CacheRecord;
use crate::cache::{open_record, CacheKey, ListingCache};
use crate::clock::Clock;
use crate::crypto::digest::sha256_hex;
use crate::KeysmithError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// File-based cache backend.
pub struct FileCache {
    cache_dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl FileCache {
    /// Create a file cache under the platform cache directory.
    pub fn new(namespace: &str, ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, KeysmithError> {
        let base_dir = dirs::cache_dir()
            .or_else(dirs::data_dir)
            .ok_or_else(|| KeysmithError::CacheIO("Could not find cache directory".to_string()))?;

        Self::with_path(base_dir.join(namespace), ttl, clock)
    }

    /// Create a file cache rooted at `cache_dir`.
    pub fn with_path(
        cache_dir: PathBuf,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeysmithError> {
        fs::create_dir_all(&cache_dir)
            .map_err(|e| KeysmithError::CacheIO(format!("Failed to create cache dir: {}", e)))?;
        Ok(Self {
            cache_dir,
            ttl,
            clock,
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", sha256_hex(key.as_bytes())))
    }

    fn remove(&self, path: &Path) -> Result<(), KeysmithError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeysmithError::CacheIO(format!("Failed to delete cache: {}", e))),
        }
    }

    /// Delete every cache file.
    pub fn clear(&self) -> Result<(), KeysmithError> {
        for entry in fs::read_dir(&self.cache_dir)
            .map_err(|e| KeysmithError::CacheIO(format!("Failed to read cache dir: {}", e)))?
        {
            let entry =
                entry.map_err(|e| KeysmithError::CacheIO(format!("Failed to read entry: {}", e)))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                self.remove(&path)?;
            }
        }
        Ok(())
    }
}

impl ListingCache for FileCache {
    fn get(&self, key: &CacheKey) -> Result<Option<String>, KeysmithError> {
        let key = key.to_string();
        let path = self.entry_path(&key);

        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeysmithError::CacheIO(format!(
                    "Failed to read cache file: {}",
                    e
                )))
            }
        };

        let opened = CacheRecord::from_json(&json)
            .and_then(|record| open_record(record, &key, self.clock.as_ref()));
        match opened {
            Ok(body) => Ok(Some(body)),
            Err(err) => {
                debug!(cache_key = %key, error = %err, "Discarding unusable cache file");
                self.remove(&path)?;
                Err(err)
            }
        }
    }

    fn set(&self, key: &CacheKey, body: String) -> Result<(), KeysmithError> {
        let key = key.to_string();
        let record = CacheRecord::new(&key, body, self.ttl, self.clock.as_ref())?;
        let json = record.to_json()?;

        let target_path = self.entry_path(&key);
        let temp_path = self
            .cache_dir
            .join(format!("{}.tmp", Uuid::new_v4().simple()));

        fs::write(&temp_path, json)
            .map_err(|e| KeysmithError::CacheIO(format!("Failed to write temp file: {}", e)))?;

        fs::rename(&temp_path, &target_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            KeysmithError::CacheIO(format!("Failed to rename cache file: {}", e))
        })?;

        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<(), KeysmithError> {
        self.remove(&self.entry_path(&key.to_string()))
    }
}
