//! Request payloads accepted by the HTTP surface and their validation.
//!
//! The lifecycle engine assumes these constraints already hold; it only
//! enforces ownership and state invariants itself.

use crate::policy::duration::LicenseDuration;
use crate::protocol::models::GenerationSpec;
use crate::KeysmithError;
use serde::Deserialize;

/// Maximum keys generated per request.
pub const MAX_LICENSE_AMOUNT: usize = 100;
/// Maximum duration amount per request.
pub const MAX_DURATION_AMOUNT: u32 = 10;
/// Maximum prefix length.
pub const MAX_PREFIX_LEN: usize = 25;
/// Maximum note length in characters.
pub const MAX_NOTE_LEN: usize = 255;
/// Maximum application name length in characters.
pub const MAX_APP_NAME_LEN: usize = 25;
/// Maximum key length.
pub const MAX_KEY_LEN: usize = 100;
/// Maximum hardware id length.
pub const MAX_HWID_LEN: usize = 255;

fn invalid(field: &str, reason: &str) -> KeysmithError {
    KeysmithError::ValidationFailed(format!("{}: {}", field, reason))
}

/// `^([X]+(-[X]+)*)?$`: groups of `X` joined by single dashes, or empty.
pub fn is_valid_mask(mask: &str) -> bool {
    mask.is_empty()
        || mask
            .split('-')
            .all(|group| !group.is_empty() && group.chars().all(|c| c == 'X'))
}

/// `^[A-Za-z0-9]+$` with length 1..=25.
pub fn is_valid_prefix(prefix: &str) -> bool {
    (1..=MAX_PREFIX_LEN).contains(&prefix.len())
        && prefix.chars().all(|c| c.is_ascii_alphanumeric())
}

/// `^[A-Za-z0-9-]+$` with length 1..=`max_len`.
pub fn is_valid_token(value: &str, max_len: usize) -> bool {
    (1..=max_len).contains(&value.len())
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// 36 characters of hex digits and dashes (UUID text).
pub fn is_valid_application_id(id: &str) -> bool {
    id.len() == 36 && id.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

/// Body of `POST /applications`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApplicationRequest {
    /// Desired application name.
    #[serde(rename = "appName")]
    pub app_name: String,
}

impl CreateApplicationRequest {
    /// Validate and return the trimmed name.
    pub fn validate(&self) -> Result<String, KeysmithError> {
        let name = self.app_name.trim();
        let len = name.chars().count();
        if len == 0 || len > MAX_APP_NAME_LEN {
            return Err(invalid("appName", "must be 1 to 25 characters"));
        }
        Ok(name.to_string())
    }
}

/// Body of `POST /applications/{id}/licenses`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateLicensesRequest {
    /// Number of keys to generate.
    pub license_amount: usize,
    /// Key mask.
    pub license_mask: String,
    /// Key prefix.
    pub prefix: String,
    /// Note copied onto each key.
    #[serde(default)]
    pub license_note: String,
    /// Duration unit name (`Day`, `Weeks`, ...).
    pub license_expiry_unit: String,
    /// Duration amount.
    pub license_duration: u32,
}

impl GenerateLicensesRequest {
    /// Validate the request and convert it to a [`GenerationSpec`].
    pub fn validate(&self) -> Result<GenerationSpec, KeysmithError> {
        if !(1..=MAX_LICENSE_AMOUNT).contains(&self.license_amount) {
            return Err(invalid("license_amount", "must be between 1 and 100"));
        }
        if !is_valid_mask(&self.license_mask) {
            return Err(invalid("license_mask", "must match ^([X]+(-[X]+)*)?$"));
        }
        if !is_valid_prefix(&self.prefix) {
            return Err(invalid("prefix", "must be 1 to 25 alphanumeric characters"));
        }
        // Keys are `<prefix>-<mask>` and must stay redeemable.
        if self.prefix.len() + 1 + self.license_mask.len() > MAX_KEY_LEN {
            return Err(invalid(
                "license_mask",
                "prefix and mask together must produce keys of at most 100 characters",
            ));
        }
        if self.license_note.chars().count() > MAX_NOTE_LEN {
            return Err(invalid("license_note", "must be at most 255 characters"));
        }
        if !(1..=MAX_DURATION_AMOUNT).contains(&self.license_duration) {
            return Err(invalid("license_duration", "must be between 1 and 10"));
        }
        let unit = self
            .license_expiry_unit
            .parse()
            .map_err(|_| invalid("license_expiry_unit", "unsupported unit"))?;

        Ok(GenerationSpec {
            count: self.license_amount,
            prefix: self.prefix.clone(),
            mask: self.license_mask.clone(),
            note: self.license_note.clone(),
            duration: LicenseDuration::new(self.license_duration, unit)?,
        })
    }
}

/// Body of `POST /public/applications/{id}/redeem-license`.
#[derive(Debug, Clone, Deserialize)]
pub struct RedeemLicenseRequest {
    /// Key to redeem.
    pub key: String,
    /// Hardware id of the redeeming machine.
    pub hwid: String,
}

impl RedeemLicenseRequest {
    /// Validate key and hardware id shape.
    pub fn validate(&self) -> Result<(), KeysmithError> {
        if !is_valid_token(&self.key, MAX_KEY_LEN) {
            return Err(invalid("key", "must match ^[A-Za-z0-9-]+$ (1 to 100 characters)"));
        }
        if !is_valid_token(&self.hwid, MAX_HWID_LEN) {
            return Err(invalid("hwid", "must match ^[A-Za-z0-9-]+$ (1 to 255 characters)"));
        }
        Ok(())
    }
}

/// Body of `DELETE /applications/{id}/licenses`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteLicensesRequest {
    /// Keys to delete, all or nothing.
    pub keys: Vec<String>,
}

impl DeleteLicensesRequest {
    /// Validate that at least one well-formed key is present.
    pub fn validate(&self) -> Result<(), KeysmithError> {
        if self.keys.is_empty() {
            return Err(invalid("keys", "cannot be empty"));
        }
        if let Some(bad) = self.keys.iter().find(|k| !is_valid_token(k, MAX_KEY_LEN)) {
            return Err(KeysmithError::ValidationFailed(format!(
                "keys: '{}' must match ^[A-Za-z0-9-]+$ (1 to 100 characters)",
                bad
            )));
        }
        Ok(())
    }
}
