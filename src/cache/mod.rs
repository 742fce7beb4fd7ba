//! Cache-aside storage for application and license listings.
//!
//! Only the two listing reads are cached: a user's applications and an
//! application's licenses. Entries expire after the configured TTL and are
//! deleted after every store mutation that changes what they hold.
//!
//! Cache failures never reach callers of the lifecycle engine. A failed or
//! rejected read counts as a miss, a failed write or invalidation is logged.

pub mod file;
pub mod format;
pub mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

use crate::cache::format::CacheRecord;
use crate::clock::Clock;
use crate::config::{CacheBackend, KeysmithConfig};
use crate::KeysmithError;
use std::fmt;
use std::sync::Arc;

/// Identity of a cached listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Applications owned by a user.
    UserApplications(String),
    /// Licenses of an application.
    ApplicationLicenses(String),
}

impl CacheKey {
    /// Key for a user's application listing.
    pub fn user_applications(owner_id: &str) -> Self {
        Self::UserApplications(owner_id.to_string())
    }

    /// Key for an application's license listing.
    pub fn application_licenses(application_id: &str) -> Self {
        Self::ApplicationLicenses(application_id.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserApplications(owner) => write!(f, "user:{}:applications", owner),
            Self::ApplicationLicenses(app) => write!(f, "application:{}:licenses", app),
        }
    }
}

/// A TTL-bounded key/value store for serialized listings.
pub trait ListingCache: Send + Sync {
    /// Cached body for `key`.
    ///
    /// `Ok(None)` when absent. Expired or tampered entries are errors,
    /// which callers treat as a miss.
    fn get(&self, key: &CacheKey) -> Result<Option<String>, KeysmithError>;

    /// Store `body` under `key`, replacing any previous entry.
    fn set(&self, key: &CacheKey, body: String) -> Result<(), KeysmithError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn invalidate(&self, key: &CacheKey) -> Result<(), KeysmithError>;
}

/// Build the backend selected by `config`.
pub fn from_config(
    config: &KeysmithConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn ListingCache>, KeysmithError> {
    let cache: Arc<dyn ListingCache> = match config.cache_backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(config.listing_ttl, clock)),
        CacheBackend::File => Arc::new(FileCache::new(
            &config.cache_namespace,
            config.listing_ttl,
            clock,
        )?),
    };
    Ok(cache)
}

/// Verify a loaded record and hand back its body.
fn open_record(
    record: CacheRecord,
    key: &str,
    clock: &dyn Clock,
) -> Result<String, KeysmithError> {
    record.verify(key, clock)?;
    Ok(record.body)
}
