//! Authoritative persistence for applications and licenses.
//!
//! The store is the source of truth; the listing cache only ever holds
//! copies of what a store read returned. Every multi-row mutation is
//! atomic: it either fully applies or leaves the store untouched.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::protocol::models::{Application, Binding, License};
use crate::KeysmithError;

/// The `(owner, application)` pair every license operation is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope<'a> {
    /// Owning user's subject id.
    pub owner_id: &'a str,
    /// Application id.
    pub application_id: &'a str,
}

impl<'a> Scope<'a> {
    /// Build a scope.
    pub fn new(owner_id: &'a str, application_id: &'a str) -> Self {
        Self {
            owner_id,
            application_id,
        }
    }
}

/// Persistence operations used by the lifecycle engine.
///
/// Implementations map backend unavailability (locks held past the
/// configured timeout, unreachable files) to
/// [`KeysmithError::StoreUnavailable`].
pub trait LicenseStore: Send + Sync {
    /// Insert a new application.
    ///
    /// Fails with `ApplicationExists` if the owner already has one by that name.
    fn insert_application(&self, application: &Application) -> Result<(), KeysmithError>;

    /// Application `id` if it exists and belongs to `owner_id`.
    fn find_application(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<Application>, KeysmithError>;

    /// Owner of application `id`, if it exists.
    fn application_owner(&self, id: &str) -> Result<Option<String>, KeysmithError>;

    /// All applications of `owner_id`, oldest first.
    fn list_applications(&self, owner_id: &str) -> Result<Vec<Application>, KeysmithError>;

    /// Delete an application and all of its licenses in one transaction.
    ///
    /// Returns the number of licenses removed; `ApplicationNotFound` if the
    /// application is absent or owned by someone else.
    fn delete_application(&self, owner_id: &str, id: &str) -> Result<usize, KeysmithError>;

    /// Insert a batch of licenses in one transaction.
    ///
    /// Any `(application, key)` collision fails the whole batch with
    /// `DuplicateKey`.
    fn insert_licenses(&self, licenses: &[License]) -> Result<(), KeysmithError>;

    /// A single license by key within `scope`.
    fn find_license(&self, scope: Scope<'_>, key: &str) -> Result<Option<License>, KeysmithError>;

    /// All licenses within `scope`, in generation order.
    fn list_licenses(&self, scope: Scope<'_>) -> Result<Vec<License>, KeysmithError>;

    /// Bind an unused license: `Not Used -> Used` with `binding`.
    ///
    /// Returns `false` without writing if the license is no longer `Not Used`.
    fn bind_license(
        &self,
        scope: Scope<'_>,
        key: &str,
        binding: &Binding,
    ) -> Result<bool, KeysmithError>;

    /// Set a license to `Banned`, keeping any binding.
    ///
    /// Banning an already banned license succeeds. `LicenseNotFound` if absent.
    fn ban_license(&self, scope: Scope<'_>, key: &str) -> Result<(), KeysmithError>;

    /// Delete one license; `LicenseNotFound` if absent.
    fn delete_license(&self, scope: Scope<'_>, key: &str) -> Result<(), KeysmithError>;

    /// Delete every listed key or none of them.
    ///
    /// Duplicate keys count once. If any key is absent nothing is deleted
    /// and `LicenseNotFound` is returned.
    fn delete_licenses(&self, scope: Scope<'_>, keys: &[String]) -> Result<usize, KeysmithError>;

    /// Delete every license in `scope`; returns how many were removed.
    fn delete_all_licenses(&self, scope: Scope<'_>) -> Result<usize, KeysmithError>;
}
