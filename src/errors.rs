//! Keysmith error types.

use thiserror::Error;

/// Errors produced by the license lifecycle, its store and its cache.
///
/// Every variant carries a stable machine-readable [`code`](Self::code) so
/// client integrations can branch on it instead of the message text.
#[derive(Debug, Error)]
pub enum KeysmithError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Caller input is outside the allowed domain.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Bearer credential missing, malformed or rejected by the identity provider.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Application absent or not owned by the caller.
    #[error("Application not found or does not belong to the user")]
    ApplicationNotFound,

    /// License absent or not owned by the caller.
    #[error("License not found")]
    LicenseNotFound,

    /// The owner already has an application with this name.
    #[error("Application name already in use: {name}")]
    ApplicationExists {
        /// The conflicting application name.
        name: String,
    },

    /// A generated key collided with an existing `(application, key)` pair.
    #[error("License key already exists for this application")]
    DuplicateKey,

    /// A used, unexpired license was presented with a different hardware id.
    #[error("HWID mismatch for used license")]
    HwidMismatch,

    /// A used license is past its expiry.
    #[error("License expired")]
    LicenseExpired,

    /// The license is banned; redemption is permanently refused.
    #[error("License banned")]
    LicenseBanned,

    /// Another redemption bound the license between our read and our write.
    #[error("License was redeemed concurrently")]
    AlreadyRedeemed,

    /// The authoritative store is unreachable or timed out.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Cache backend I/O error.
    #[error("Cache I/O error: {0}")]
    CacheIO(String),

    /// Cache record failed its integrity check.
    #[error("Cache tampering detected")]
    CacheTampered,

    /// Cache record outlived its time-to-live.
    #[error("Cache entry expired")]
    CacheExpired,

    /// Unexpected parse or serialization failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeysmithError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::ValidationFailed(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "INVALID_TOKEN",
            Self::ApplicationNotFound => "APPLICATION_NOT_FOUND",
            Self::LicenseNotFound => "LICENSE_NOT_FOUND",
            Self::ApplicationExists { .. } => "APPLICATION_EXISTS",
            Self::DuplicateKey => "DUPLICATE_KEY",
            Self::HwidMismatch => "HWID_MISMATCH",
            Self::LicenseExpired => "LICENSE_EXPIRED",
            Self::LicenseBanned => "LICENSE_BANNED",
            Self::AlreadyRedeemed => "LICENSE_ALREADY_REDEEMED",
            Self::StoreUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            Self::CacheIO(_) | Self::CacheTampered | Self::CacheExpired => "CACHE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for KeysmithError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("Serialization error: {}", err))
    }
}
