//! Process-local listing cache.

use crate::cache::format::CacheRecord;
use crate::cache::{open_record, CacheKey, ListingCache};
use crate::clock::Clock;
use crate::KeysmithError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// In-memory cache backend.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheRecord>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, CacheRecord>>, KeysmithError> {
        self.entries
            .lock()
            .map_err(|_| KeysmithError::CacheIO("cache lock poisoned".to_string()))
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ListingCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<String>, KeysmithError> {
        let key = key.to_string();
        let mut entries = self.entries()?;
        let Some(record) = entries.get(&key).cloned() else {
            return Ok(None);
        };

        match open_record(record, &key, self.clock.as_ref()) {
            Ok(body) => Ok(Some(body)),
            Err(err) => {
                entries.remove(&key);
                Err(err)
            }
        }
    }

    fn set(&self, key: &CacheKey, body: String) -> Result<(), KeysmithError> {
        let key = key.to_string();
        let record = CacheRecord::new(&key, body, self.ttl, self.clock.as_ref())?;
        let now = self.clock.now_utc();

        let mut entries = self.entries()?;
        // `get` only evicts the key it reads.
        entries.retain(|_, existing| !existing.is_expired(now));
        entries.insert(key, record);
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<(), KeysmithError> {
        self.entries()?.remove(&key.to_string());
        Ok(())
    }
}
