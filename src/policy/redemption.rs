//! Redemption rules of the license state machine.
//!
//! ```text
//! NotUsed --redeem--------------------------> Used (bind hwid, start expiry)
//! Used    --redeem(same hwid, not expired)--> Used (re-validation, no write)
//! Used    --redeem(expired)-----------------> reject LicenseExpired
//! Used    --redeem(other hwid)--------------> reject HwidMismatch
//! Banned  --redeem--------------------------> reject LicenseBanned
//! ```
//!
//! This module decides; it performs no I/O. The manager applies the
//! decision to the store.

use crate::protocol::models::{Binding, License, LicenseStatus};
use crate::KeysmithError;
use chrono::{DateTime, Utc};

/// What a redemption attempt should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionDecision {
    /// First redemption: persist this binding.
    Bind(Binding),

    /// The bound machine is re-validating; nothing changes.
    Revalidate {
        /// The existing expiry.
        expires_at: DateTime<Utc>,
    },
}

impl RedemptionDecision {
    /// Expiry the caller will be told about.
    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            Self::Bind(binding) => binding.expires_at,
            Self::Revalidate { expires_at } => *expires_at,
        }
    }
}

/// Decide the outcome of redeeming `license` from machine `hwid` at `now`.
///
/// # Errors
/// - `LicenseBanned` - license is banned, regardless of hwid or expiry
/// - `LicenseExpired` - license is used and past its expiry
/// - `HwidMismatch` - license is used, unexpired, and bound to another hwid
/// - `Internal` - a used license carries no binding (corrupt record)
pub fn check_redemption(
    license: &License,
    hwid: &str,
    ip: &str,
    now: DateTime<Utc>,
) -> Result<RedemptionDecision, KeysmithError> {
    match license.status {
        LicenseStatus::Banned => Err(KeysmithError::LicenseBanned),
        LicenseStatus::Used => {
            let binding = license.binding.as_ref().ok_or_else(|| {
                KeysmithError::Internal(format!(
                    "used license {} has no expiry recorded",
                    license.key
                ))
            })?;

            if now > binding.expires_at {
                return Err(KeysmithError::LicenseExpired);
            }
            if binding.hwid != hwid {
                return Err(KeysmithError::HwidMismatch);
            }

            Ok(RedemptionDecision::Revalidate {
                expires_at: binding.expires_at,
            })
        }
        LicenseStatus::NotUsed => {
            let expires_at = license.duration.expires_at(now)?;
            Ok(RedemptionDecision::Bind(Binding {
                used_at: now,
                expires_at,
                ip: ip.to_string(),
                hwid: hwid.to_string(),
            }))
        }
    }
}
