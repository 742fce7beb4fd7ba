//! Keysmith configuration.
//!
//! Everything the service needs is carried by [`KeysmithConfig`] and passed
//! explicitly to the components that use it; nothing reads the process
//! environment after [`KeysmithConfig::from_env`] returns.

use crate::KeysmithError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default time-to-live of cached application and license listings.
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(10 * 60);

/// Default bound on how long a store call may wait for a lock.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default timeout for identity-provider calls.
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Which listing cache backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// Process-local map.
    Memory,
    /// One file per cache key under the platform cache directory.
    File,
}

impl std::str::FromStr for CacheBackend {
    type Err = KeysmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(KeysmithError::ConfigError(format!(
                "unknown cache backend '{}', expected 'memory' or 'file'",
                other
            ))),
        }
    }
}

/// Settings for the external OpenID-Connect identity provider.
#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    /// Base URL of the provider (e.g. `https://auth.example.com`).
    pub base_url: String,

    /// Realm whose userinfo endpoint verifies bearer tokens.
    pub realm: String,

    /// Upper bound on a single verification call.
    pub timeout: Duration,
}

impl IdentityProviderConfig {
    /// Userinfo endpoint for the configured realm.
    pub fn userinfo_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/userinfo",
            self.base_url.trim_end_matches('/'),
            self.realm
        )
    }
}

/// Configuration for the keysmith service.
#[derive(Debug, Clone)]
pub struct KeysmithConfig {
    /// Socket address the HTTP surface listens on.
    pub bind_addr: String,

    /// SQLite database file.
    pub database_path: PathBuf,

    /// Listing cache backend.
    pub cache_backend: CacheBackend,

    /// Namespace (directory name) for the file cache backend.
    pub cache_namespace: String,

    /// How long cached listings stay valid.
    pub listing_ttl: Duration,

    /// Bound on store lock waits; exceeding it surfaces `StoreUnavailable`.
    pub store_timeout: Duration,

    /// Identity provider; `None` when the engine is embedded without HTTP auth.
    pub identity: Option<IdentityProviderConfig>,
}

impl Default for KeysmithConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8001".to_string(),
            database_path: PathBuf::from("data/keysmith.db"),
            cache_backend: CacheBackend::Memory,
            cache_namespace: "keysmith".to_string(),
            listing_ttl: DEFAULT_LISTING_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            identity: None,
        }
    }
}

impl KeysmithConfig {
    /// Build a configuration from process environment variables.
    ///
    /// Unset variables fall back to the defaults; set-but-malformed ones are
    /// an error rather than being silently ignored.
    pub fn from_env() -> Result<Self, KeysmithError> {
        let defaults = Self::default();

        let identity = match (env_opt("KEYCLOAK_URL"), env_opt("REALM")) {
            (Some(base_url), Some(realm)) => Some(IdentityProviderConfig {
                base_url,
                realm,
                timeout: env_duration_secs(
                    "KEYSMITH_IDENTITY_TIMEOUT_SECS",
                    DEFAULT_IDENTITY_TIMEOUT,
                )?,
            }),
            (None, None) => None,
            _ => {
                return Err(KeysmithError::ConfigError(
                    "KEYCLOAK_URL and REALM must be set together".to_string(),
                ))
            }
        };

        let config = Self {
            bind_addr: env_opt("KEYSMITH_BIND").unwrap_or(defaults.bind_addr),
            database_path: env_opt("DATABASE_URL")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            cache_backend: match env_opt("KEYSMITH_CACHE") {
                Some(raw) => raw.parse()?,
                None => defaults.cache_backend,
            },
            cache_namespace: env_opt("KEYSMITH_CACHE_NAMESPACE")
                .unwrap_or(defaults.cache_namespace),
            listing_ttl: env_duration_secs("KEYSMITH_LISTING_TTL_SECS", defaults.listing_ttl)?,
            store_timeout: match env_opt("KEYSMITH_STORE_TIMEOUT_MS") {
                Some(raw) => Duration::from_millis(parse_u64("KEYSMITH_STORE_TIMEOUT_MS", &raw)?),
                None => defaults.store_timeout,
            },
            identity,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), KeysmithError> {
        if self.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(KeysmithError::ConfigError(format!(
                "bind_addr is not a socket address: {}",
                self.bind_addr
            )));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(KeysmithError::ConfigError(
                "database_path cannot be empty".to_string(),
            ));
        }
        if self.cache_namespace.is_empty() {
            return Err(KeysmithError::ConfigError(
                "cache_namespace cannot be empty".to_string(),
            ));
        }
        if self.listing_ttl.is_zero() {
            return Err(KeysmithError::ConfigError(
                "listing_ttl must be greater than zero".to_string(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(KeysmithError::ConfigError(
                "store_timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(identity) = &self.identity {
            if identity.base_url.is_empty() || identity.realm.is_empty() {
                return Err(KeysmithError::ConfigError(
                    "identity provider base_url and realm cannot be empty".to_string(),
                ));
            }
            if identity.timeout.is_zero() {
                return Err(KeysmithError::ConfigError(
                    "identity timeout must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_u64(name: &str, raw: &str) -> Result<u64, KeysmithError> {
    raw.trim()
        .parse()
        .map_err(|e| KeysmithError::ConfigError(format!("{} must be an integer: {}", name, e)))
}

fn env_duration_secs(name: &str, default: Duration) -> Result<Duration, KeysmithError> {
    match env_opt(name) {
        Some(raw) => Ok(Duration::from_secs(parse_u64(name, &raw)?)),
        None => Ok(default),
    }
}
