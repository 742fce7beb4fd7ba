//! # Keysmith
//!
//! **License key issuance, redemption and revocation with hardware binding.**
//!
//! Keysmith lets application owners generate batches of license keys, hands
//! them to customers who redeem them once from a machine, and lets owners ban
//! or delete keys afterwards. The first redemption binds a key to the
//! machine's hardware id and starts its expiry clock.
//!
//! ## Features
//!
//! - **Masked key generation** - `PRO-XXXX-XXXX` style keys from the OS CSPRNG
//! - **Calendar-aware durations** - minutes through years, months clamp to month end
//! - **Atomic store** - bulk inserts and deletes are all-or-nothing
//! - **Race-free redemption** - binding is a compare-and-swap on status
//! - **Cache-aside listings** - TTL-bounded, integrity-checked, invalidated on write
//!
//! ## Quickstart
//!
//! ```no_run
//! use keysmith::{KeysmithConfig, LicenseManager};
//! use keysmith::policy::duration::{DurationUnit, LicenseDuration};
//! use keysmith::protocol::models::{GenerationSpec, Identity};
//!
//! fn main() -> Result<(), keysmith::KeysmithError> {
//!     let manager = LicenseManager::new(KeysmithConfig::default())?;
//!     let owner = Identity::new("user-1", "alice");
//!
//!     let app = manager.create_application(&owner.subject, "Editor")?;
//!     let spec = GenerationSpec {
//!         count: 3,
//!         prefix: "PRO".to_string(),
//!         mask: "XXXX-XXXX".to_string(),
//!         note: "launch".to_string(),
//!         duration: LicenseDuration::new(1, DurationUnit::Month)?,
//!     };
//!     let licenses = manager.generate_licenses(&owner, &app.id, &spec)?;
//!
//!     let redemption = manager.redeem_license(&app.id, &licenses[0].key, "ABC123", "203.0.113.9")?;
//!     println!("valid until {}", redemption.expires_at);
//!     Ok(())
//! }
//! ```
//!
//! ## License states
//!
//! - `Not Used` - generated, never redeemed
//! - `Used` - bound to one hardware id; expired once past its expiry
//! - `Banned` - every redemption is refused
//!
//! Expiry is computed when a license is checked, never stored as a status.
//!
//! ## Consistency
//!
//! The store is authoritative. Listings are cached for a bounded TTL and
//! invalidated after each committed mutation, so a concurrent reader may
//! briefly see the previous listing. A reader that loaded from the store
//! before a commit can also repopulate the cache after that commit's
//! invalidation; its stale snapshot is served for at most one listing TTL
//! (`KEYSMITH_LISTING_TTL_SECS`, ten minutes by default).

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Crypto layer
pub mod crypto;

// Protocol layer
pub mod protocol;

// Policy layer
pub mod policy;

// Storage layer
pub mod store;

// Cache layer
pub mod cache;

// Manager (main public API)
pub mod manager;

// Client layer
pub mod client;

// HTTP surface
pub mod http;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::KeysmithConfig;
pub use errors::KeysmithError;
pub use manager::{LicenseManager, Redemption};
pub use protocol::models::{License, LicenseStatus};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
