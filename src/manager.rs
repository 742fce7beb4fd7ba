//! License Manager - the lifecycle engine of Keysmith.
//!
//! The `LicenseManager` owns every state transition of a license and the
//! cache-aside orchestration around the store:
//! - Listing reads go through the cache and fall back to the store
//! - Every mutation commits to the store first, then invalidates the
//!   affected listing keys
//! - Redemption binds a license to a hardware id exactly once
//!
//! Listings are eventually consistent; the store is always authoritative.
//! Two windows exist:
//! - Invalidation runs after the store commit, so a reader can be served the
//!   pre-mutation listing until the delete lands.
//! - A reader whose store load started before the commit can `set` its
//!   snapshot after the invalidation. That stale listing is then served until
//!   the next mutation of the same key or, at worst, for a full listing TTL.

use crate::cache::{self, CacheKey, ListingCache};
use crate::clock::{Clock, SystemClock};
use crate::config::KeysmithConfig;
use crate::crypto::keygen::generate_batch;
use crate::policy::redemption::{check_redemption, RedemptionDecision};
use crate::protocol::models::{Application, ApplicationLicenses, GenerationSpec, Identity, License};
use crate::store::{LicenseStore, Scope, SqliteStore};
use crate::KeysmithError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a successful redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redemption {
    /// When the license stops being valid.
    pub expires_at: DateTime<Utc>,

    /// `true` on first binding, `false` on a same-hardware re-validation.
    pub newly_bound: bool,
}

/// Main entry point for license lifecycle operations.
///
/// Create one instance per process and share it; all methods take `&self`.
pub struct LicenseManager {
    config: KeysmithConfig,
    store: Arc<dyn LicenseStore>,
    cache: Arc<dyn ListingCache>,
    clock: Arc<dyn Clock>,
}

impl LicenseManager {
    /// Create a manager backed by the SQLite store and cache backend named
    /// in `config`, using the system clock.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The database cannot be opened or migrated
    /// - The cache directory cannot be created
    pub fn new(config: KeysmithConfig) -> Result<Self, KeysmithError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = SqliteStore::open(&config.database_path, config.store_timeout)?;
        let cache = cache::from_config(&config, clock.clone())?;
        Ok(Self::with_parts(config, Arc::new(store), cache, clock))
    }

    /// Assemble a manager from explicit collaborators.
    pub fn with_parts(
        config: KeysmithConfig,
        store: Arc<dyn LicenseStore>,
        cache: Arc<dyn ListingCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            clock,
        }
    }

    /// Get the current configuration.
    pub fn config(&self) -> &KeysmithConfig {
        &self.config
    }

    /// Create an application owned by `owner_id`.
    ///
    /// # Errors
    /// - `ApplicationExists` - the owner already has an application by that name
    pub fn create_application(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Application, KeysmithError> {
        let application = Application {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            created_at: self.clock.now_utc(),
        };
        self.store.insert_application(&application)?;
        self.invalidate(&CacheKey::user_applications(owner_id));

        info!(
            owner_id = %owner_id,
            application_id = %application.id,
            "Application created"
        );
        Ok(application)
    }

    /// Delete an application together with all of its licenses.
    ///
    /// Returns how many licenses were removed.
    pub fn delete_application(
        &self,
        owner_id: &str,
        application_id: &str,
    ) -> Result<usize, KeysmithError> {
        let removed = self.store.delete_application(owner_id, application_id)?;
        self.invalidate(&CacheKey::user_applications(owner_id));
        self.invalidate(&CacheKey::application_licenses(application_id));

        info!(
            owner_id = %owner_id,
            application_id = %application_id,
            licenses = removed,
            "Application deleted"
        );
        Ok(removed)
    }

    /// Applications owned by `owner_id`.
    pub fn list_applications(&self, owner_id: &str) -> Result<Vec<Application>, KeysmithError> {
        self.read_through(&CacheKey::user_applications(owner_id), || {
            self.store.list_applications(owner_id)
        })
    }

    /// Licenses of an application owned by `owner_id`.
    ///
    /// # Errors
    /// - `ApplicationNotFound` - absent, or owned by someone else
    pub fn list_licenses(
        &self,
        owner_id: &str,
        application_id: &str,
    ) -> Result<Vec<License>, KeysmithError> {
        let owned = self
            .list_applications(owner_id)?
            .iter()
            .any(|app| app.id == application_id);
        if !owned {
            return Err(KeysmithError::ApplicationNotFound);
        }
        self.cached_licenses(Scope::new(owner_id, application_id))
    }

    /// Every application of `owner_id` with its licenses.
    pub fn dashboard(&self, owner_id: &str) -> Result<Vec<ApplicationLicenses>, KeysmithError> {
        self.list_applications(owner_id)?
            .into_iter()
            .map(|application| {
                let licenses = self.cached_licenses(Scope::new(owner_id, &application.id))?;
                Ok(ApplicationLicenses {
                    application,
                    licenses,
                })
            })
            .collect()
    }

    /// Generate a batch of unused licenses for an application the caller owns.
    ///
    /// The batch is inserted atomically: a key collision fails all of it.
    ///
    /// # Errors
    /// - `ApplicationNotFound` - absent, or owned by someone else
    /// - `DuplicateKey` - a generated key already exists for the application
    pub fn generate_licenses(
        &self,
        identity: &Identity,
        application_id: &str,
        spec: &GenerationSpec,
    ) -> Result<Vec<License>, KeysmithError> {
        if spec.count == 0 {
            return Err(KeysmithError::ValidationFailed(
                "license count must be at least 1".to_string(),
            ));
        }
        self.require_application(&identity.subject, application_id)?;

        let now = self.clock.now_utc();
        let licenses: Vec<License> = generate_batch(&spec.prefix, &spec.mask, spec.count)
            .into_iter()
            .map(|key| {
                License::unused(
                    &identity.subject,
                    application_id,
                    key,
                    &spec.note,
                    now,
                    spec.duration,
                    &identity.display_name,
                )
            })
            .collect();

        self.store.insert_licenses(&licenses)?;
        self.invalidate(&CacheKey::application_licenses(application_id));

        info!(
            owner_id = %identity.subject,
            application_id = %application_id,
            count = licenses.len(),
            "Licenses generated"
        );
        Ok(licenses)
    }

    /// Redeem `key` for application `application_id` from machine `hwid`.
    ///
    /// The first redemption binds the license to `hwid` and starts its
    /// expiry. Later redemptions from the same machine re-validate without
    /// writing.
    ///
    /// # Errors
    /// - `LicenseNotFound` - no such key for the application
    /// - `LicenseBanned` - the license is banned
    /// - `LicenseExpired` - the license is used and past its expiry
    /// - `HwidMismatch` - the license is bound to another machine
    /// - `AlreadyRedeemed` - a concurrent redemption bound it first
    /// - `Internal` - the stored record is corrupt
    pub fn redeem_license(
        &self,
        application_id: &str,
        key: &str,
        hwid: &str,
        ip: &str,
    ) -> Result<Redemption, KeysmithError> {
        let owner_id = self
            .store
            .application_owner(application_id)?
            .ok_or(KeysmithError::LicenseNotFound)?;
        let scope = Scope::new(&owner_id, application_id);

        let license = self
            .store
            .find_license(scope, key)?
            .ok_or(KeysmithError::LicenseNotFound)?;

        let decision = check_redemption(&license, hwid, ip, self.clock.now_utc())
            .inspect_err(|err| {
                info!(
                    application_id = %application_id,
                    code = err.code(),
                    "Redemption refused"
                );
            })?;

        let expires_at = decision.expires_at();
        let RedemptionDecision::Bind(binding) = decision else {
            debug!(application_id = %application_id, "License re-validated");
            return Ok(Redemption {
                expires_at,
                newly_bound: false,
            });
        };

        if !self.store.bind_license(scope, key, &binding)? {
            warn!(application_id = %application_id, "Redemption lost a concurrent bind");
            return Err(KeysmithError::AlreadyRedeemed);
        }
        self.invalidate(&CacheKey::application_licenses(application_id));

        info!(
            application_id = %application_id,
            expires_at = %expires_at,
            "License bound"
        );
        Ok(Redemption {
            expires_at,
            newly_bound: true,
        })
    }

    /// Delete one license.
    pub fn delete_license(
        &self,
        owner_id: &str,
        application_id: &str,
        key: &str,
    ) -> Result<(), KeysmithError> {
        self.require_application(owner_id, application_id)?;
        self.store
            .delete_license(Scope::new(owner_id, application_id), key)?;
        self.invalidate(&CacheKey::application_licenses(application_id));

        info!(application_id = %application_id, "License deleted");
        Ok(())
    }

    /// Delete all listed keys or none of them.
    ///
    /// # Errors
    /// - `ValidationFailed` - `keys` is empty
    /// - `LicenseNotFound` - at least one key is absent; nothing was deleted
    pub fn delete_licenses(
        &self,
        owner_id: &str,
        application_id: &str,
        keys: &[String],
    ) -> Result<usize, KeysmithError> {
        if keys.is_empty() {
            return Err(KeysmithError::ValidationFailed(
                "keys cannot be empty".to_string(),
            ));
        }
        self.require_application(owner_id, application_id)?;

        let removed = self
            .store
            .delete_licenses(Scope::new(owner_id, application_id), keys)?;
        self.invalidate(&CacheKey::application_licenses(application_id));

        info!(application_id = %application_id, count = removed, "Licenses deleted");
        Ok(removed)
    }

    /// Delete every license of an application; zero is a valid outcome.
    pub fn delete_all_licenses(
        &self,
        owner_id: &str,
        application_id: &str,
    ) -> Result<usize, KeysmithError> {
        self.require_application(owner_id, application_id)?;

        let removed = self
            .store
            .delete_all_licenses(Scope::new(owner_id, application_id))?;
        self.invalidate(&CacheKey::application_licenses(application_id));

        info!(application_id = %application_id, count = removed, "All licenses deleted");
        Ok(removed)
    }

    /// Ban a license. Banning an already banned license succeeds.
    pub fn ban_license(
        &self,
        owner_id: &str,
        application_id: &str,
        key: &str,
    ) -> Result<(), KeysmithError> {
        self.require_application(owner_id, application_id)?;
        self.store
            .ban_license(Scope::new(owner_id, application_id), key)?;
        self.invalidate(&CacheKey::application_licenses(application_id));

        info!(application_id = %application_id, "License banned");
        Ok(())
    }

    fn require_application(
        &self,
        owner_id: &str,
        application_id: &str,
    ) -> Result<Application, KeysmithError> {
        self.store
            .find_application(owner_id, application_id)?
            .ok_or(KeysmithError::ApplicationNotFound)
    }

    fn cached_licenses(&self, scope: Scope<'_>) -> Result<Vec<License>, KeysmithError> {
        self.read_through(&CacheKey::application_licenses(scope.application_id), || {
            self.store.list_licenses(scope)
        })
    }

    /// Serve `key` from the cache, or load it from the store and repopulate.
    ///
    /// Cache failures of any kind degrade to the store read.
    fn read_through<T, F>(&self, key: &CacheKey, load: F) -> Result<T, KeysmithError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, KeysmithError>,
    {
        match self.cache.get(key) {
            Ok(Some(body)) => match serde_json::from_str(&body) {
                Ok(value) => {
                    debug!(cache_key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(cache_key = %key, error = %e, "Undecodable cache snapshot"),
            },
            Ok(None) => debug!(cache_key = %key, "Cache miss"),
            Err(e) => warn!(cache_key = %key, error = %e, "Cache read failed"),
        }

        let value = load()?;

        match serde_json::to_string(&value) {
            Ok(body) => {
                if let Err(e) = self.cache.set(key, body) {
                    warn!(cache_key = %key, error = %e, "Cache write failed");
                }
            }
            Err(e) => warn!(cache_key = %key, error = %e, "Snapshot serialization failed"),
        }
        Ok(value)
    }

    fn invalidate(&self, key: &CacheKey) {
        match self.cache.invalidate(key) {
            Ok(()) => debug!(cache_key = %key, "Cache invalidated"),
            Err(e) => warn!(cache_key = %key, error = %e, "Cache invalidation failed"),
        }
    }
}
