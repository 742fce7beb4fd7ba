//! Integrity-checked cache record format.
//!
//! A record carries the serialized listing snapshot plus what is needed to
//! decide, on load, whether it may be served:
//! - SHA-256 checksum over the cache key and body
//! - When the record was written
//! - When it stops being valid
//!
//! On load, we:
//! 1. Recompute the checksum (mismatch = tampered)
//! 2. Reject records stamped in the future
//! 3. Reject records past `expires_at`

use crate::clock::Clock;
use crate::crypto::digest::{digest_matches, sha256_hex};
use crate::KeysmithError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached listing snapshot with integrity and expiry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Cache key the record was written under.
    pub key: String,

    /// Serialized snapshot (JSON).
    pub body: String,

    /// Hex SHA-256 of `key` and `body`.
    pub checksum: String,

    /// When the record was written.
    pub cached_at: DateTime<Utc>,

    /// When the record stops being served.
    pub expires_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Seal a snapshot under `key`, valid for `ttl` from now.
    pub fn new(
        key: &str,
        body: String,
        ttl: Duration,
        clock: &dyn Clock,
    ) -> Result<Self, KeysmithError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| KeysmithError::CacheIO(format!("TTL out of range: {}", e)))?;
        let cached_at = clock.now_utc();
        let expires_at = cached_at
            .checked_add_signed(ttl)
            .ok_or_else(|| KeysmithError::CacheIO("TTL out of range".to_string()))?;

        Ok(Self {
            checksum: checksum(key, &body),
            key: key.to_string(),
            body,
            cached_at,
            expires_at,
        })
    }

    /// Serialize the record to JSON.
    pub fn to_json(&self) -> Result<String, KeysmithError> {
        serde_json::to_string(self)
            .map_err(|e| KeysmithError::CacheIO(format!("Failed to serialize cache: {}", e)))
    }

    /// Deserialize a record from JSON.
    pub fn from_json(json: &str) -> Result<Self, KeysmithError> {
        serde_json::from_str(json)
            .map_err(|e| KeysmithError::CacheIO(format!("Failed to deserialize cache: {}", e)))
    }

    /// Check integrity and freshness of a loaded record for `key`.
    pub fn verify(&self, key: &str, clock: &dyn Clock) -> Result<(), KeysmithError> {
        let intact = digest_matches(signed_bytes(key, &self.body).as_bytes(), &self.checksum);
        if self.key != key || !intact {
            return Err(KeysmithError::CacheTampered);
        }

        let now = clock.now_utc();
        if self.cached_at > now {
            return Err(KeysmithError::CacheTampered);
        }
        if self.is_expired(now) {
            return Err(KeysmithError::CacheExpired);
        }

        Ok(())
    }

    /// Whether the record is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

fn signed_bytes(key: &str, body: &str) -> String {
    format!("{}\n{}", key, body)
}

fn checksum(key: &str, body: &str) -> String {
    sha256_hex(signed_bytes(key, body).as_bytes())
}
