//! Domain records and their wire views.
//!
//! Records keep structured values (`DateTime<Utc>`, [`LicenseDuration`],
//! `Option` for not-yet-redeemed state). The legacy display format with
//! `"N/A"` sentinels exists only in [`LicenseView`].

use crate::policy::duration::LicenseDuration;
use crate::KeysmithError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel rendered for values that do not exist yet.
pub const NOT_AVAILABLE: &str = "N/A";

/// `strftime` pattern of displayed timestamps, e.g. `2025-01-15 @ 03:04 PM`.
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d @ %I:%M %p";

/// Render a timestamp in the display format.
pub fn format_display_time(t: &DateTime<Utc>) -> String {
    t.format(DISPLAY_TIME_FORMAT).to_string()
}

/// A verified caller identity supplied by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject id; owner id of everything the caller creates.
    #[serde(rename = "sub")]
    pub subject: String,

    /// Human-readable name, recorded as `generated_by` on licenses.
    #[serde(rename = "preferred_username")]
    pub display_name: String,
}

impl Identity {
    /// Build an identity from its parts.
    pub fn new(subject: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            display_name: display_name.into(),
        }
    }
}

/// An application owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Globally unique opaque id (UUID text).
    #[serde(rename = "application_id")]
    pub id: String,

    /// Display name, unique per owner.
    #[serde(rename = "app_name")]
    pub name: String,

    /// Owning user's subject id.
    #[serde(rename = "user_id")]
    pub owner_id: String,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Stored lifecycle status of a license.
///
/// Expiry is not a stored status: it is derived from `Used` plus the bound
/// expiry at check time (see [`License::is_expired`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseStatus {
    /// Generated, never redeemed.
    #[serde(rename = "Not Used")]
    NotUsed,
    /// Bound to a hardware id by a redemption.
    Used,
    /// Permanently refused.
    Banned,
}

impl LicenseStatus {
    /// Persisted and displayed text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotUsed => "Not Used",
            Self::Used => "Used",
            Self::Banned => "Banned",
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = KeysmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Not Used" => Ok(Self::NotUsed),
            "Used" => Ok(Self::Used),
            "Banned" => Ok(Self::Banned),
            other => Err(KeysmithError::Internal(format!(
                "unknown license status '{}'",
                other
            ))),
        }
    }
}

/// Redemption state recorded when a license is first bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// First redemption time.
    pub used_at: DateTime<Utc>,
    /// `used_at + duration`.
    pub expires_at: DateTime<Utc>,
    /// Address of the redeeming client.
    pub ip: String,
    /// Hardware id the license is bound to.
    pub hwid: String,
}

/// A license key record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    /// Owner of the application this license belongs to.
    pub owner_id: String,
    /// Application id; `(application_id, key)` is unique.
    pub application_id: String,
    /// Generated key text; immutable.
    pub key: String,
    /// Free-form note.
    pub note: String,
    /// Generation time.
    pub created_at: DateTime<Utc>,
    /// Validity period, started at first redemption.
    pub duration: LicenseDuration,
    /// Display name of the identity that generated the key.
    pub generated_by: String,
    /// Stored lifecycle status.
    pub status: LicenseStatus,
    /// Present once the license has been redeemed.
    pub binding: Option<Binding>,
}

impl License {
    /// A fresh, unredeemed license.
    pub fn unused(
        owner_id: &str,
        application_id: &str,
        key: String,
        note: &str,
        created_at: DateTime<Utc>,
        duration: LicenseDuration,
        generated_by: &str,
    ) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            application_id: application_id.to_string(),
            key,
            note: note.to_string(),
            created_at,
            duration,
            generated_by: generated_by.to_string(),
            status: LicenseStatus::NotUsed,
            binding: None,
        }
    }

    /// Whether a bound license is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| now > b.expires_at)
    }
}

/// An application together with its licenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationLicenses {
    /// The application.
    pub application: Application,
    /// Its licenses.
    pub licenses: Vec<License>,
}

/// Input of a generation request after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSpec {
    /// Number of keys, 1..=100.
    pub count: usize,
    /// Key prefix.
    pub prefix: String,
    /// Key mask (`X` = random character).
    pub mask: String,
    /// Note copied onto each license.
    pub note: String,
    /// Validity period of each license.
    pub duration: LicenseDuration,
}

/// License as presented to API clients.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseView {
    pub key: String,
    pub note: String,
    pub created_on: String,
    pub duration: String,
    pub generated_by: String,
    pub used_on: String,
    pub expires_on: String,
    pub status: String,
    pub ip: String,
    pub hwid: String,
}

impl From<&License> for LicenseView {
    fn from(license: &License) -> Self {
        let binding = license.binding.as_ref();
        let or_na = |v: Option<String>| v.unwrap_or_else(|| NOT_AVAILABLE.to_string());

        Self {
            key: license.key.clone(),
            note: license.note.clone(),
            created_on: format_display_time(&license.created_at),
            duration: license.duration.to_string(),
            generated_by: license.generated_by.clone(),
            used_on: or_na(binding.map(|b| format_display_time(&b.used_at))),
            expires_on: or_na(binding.map(|b| format_display_time(&b.expires_at))),
            status: license.status.to_string(),
            ip: or_na(binding.map(|b| b.ip.clone())),
            hwid: or_na(binding.map(|b| b.hwid.clone())),
        }
    }
}
