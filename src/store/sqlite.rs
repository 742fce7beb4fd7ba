//! SQLite-backed [`LicenseStore`].

use super::{LicenseStore, Scope};
use crate::protocol::models::{Application, Binding, License, LicenseStatus};
use crate::KeysmithError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA: &str = "\
    CREATE TABLE IF NOT EXISTS applications (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(owner_id, name)
    );
    CREATE TABLE IF NOT EXISTS licenses (
        owner_id TEXT NOT NULL,
        application_id TEXT NOT NULL,
        key TEXT NOT NULL,
        note TEXT NOT NULL,
        created_at TEXT NOT NULL,
        duration TEXT NOT NULL,
        generated_by TEXT NOT NULL,
        status TEXT NOT NULL,
        used_at TEXT,
        expires_at TEXT,
        ip TEXT,
        hwid TEXT,
        UNIQUE(application_id, key)
    );
    CREATE INDEX IF NOT EXISTS idx_licenses_scope ON licenses(owner_id, application_id);
    CREATE INDEX IF NOT EXISTS idx_applications_owner ON applications(owner_id);
";

const LICENSE_COLUMNS: &str = "owner_id, application_id, key, note, created_at, duration, \
     generated_by, status, used_at, expires_at, ip, hwid";

/// License store on a single SQLite connection.
///
/// Callers in this process wait at most `timeout` for the connection; other
/// processes holding the database file are waited on through SQLite's busy
/// timeout, set to the same value. Either wait running out surfaces as
/// `StoreUnavailable`.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, KeysmithError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                KeysmithError::StoreUnavailable(format!(
                    "cannot create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::from_connection(conn, timeout)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, KeysmithError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::from_connection(conn, crate::config::DEFAULT_STORE_TIMEOUT)
    }

    fn from_connection(conn: Connection, timeout: Duration) -> Result<Self, KeysmithError> {
        conn.busy_timeout(timeout).map_err(store_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, KeysmithError> {
        self.conn.try_lock_for(self.timeout).ok_or_else(|| {
            warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                "Store connection wait timed out"
            );
            KeysmithError::StoreUnavailable(format!(
                "store connection busy for more than {} ms",
                self.timeout.as_millis()
            ))
        })
    }

    fn migrate(&self) -> Result<(), KeysmithError> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(())
    }
}

impl LicenseStore for SqliteStore {
    fn insert_application(&self, application: &Application) -> Result<(), KeysmithError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO applications (id, name, owner_id, created_at) VALUES (?, ?, ?, ?)",
            params![
                application.id,
                application.name,
                application.owner_id,
                format_time(&application.created_at),
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                KeysmithError::ApplicationExists {
                    name: application.name.clone(),
                }
            } else {
                store_err(e)
            }
        })?;
        Ok(())
    }

    fn find_application(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<Application>, KeysmithError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, name, owner_id, created_at FROM applications
                 WHERE id = ? AND owner_id = ?",
                params![id, owner_id],
                ApplicationRow::from_row,
            )
            .optional()
            .map_err(store_err)?;
        row.map(ApplicationRow::into_application).transpose()
    }

    fn application_owner(&self, id: &str) -> Result<Option<String>, KeysmithError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT owner_id FROM applications WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(store_err)
    }

    fn list_applications(&self, owner_id: &str) -> Result<Vec<Application>, KeysmithError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, owner_id, created_at FROM applications
                 WHERE owner_id = ? ORDER BY created_at, rowid",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![owner_id], ApplicationRow::from_row)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        rows.into_iter().map(ApplicationRow::into_application).collect()
    }

    fn delete_application(&self, owner_id: &str, id: &str) -> Result<usize, KeysmithError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;

        let licenses = tx
            .execute(
                "DELETE FROM licenses WHERE owner_id = ? AND application_id = ?",
                params![owner_id, id],
            )
            .map_err(store_err)?;
        let applications = tx
            .execute(
                "DELETE FROM applications WHERE owner_id = ? AND id = ?",
                params![owner_id, id],
            )
            .map_err(store_err)?;

        if applications == 0 {
            // Dropping the transaction rolls back the license delete.
            return Err(KeysmithError::ApplicationNotFound);
        }

        tx.commit().map_err(store_err)?;
        debug!(application_id = %id, licenses, "Application deleted");
        Ok(licenses)
    }

    fn insert_licenses(&self, licenses: &[License]) -> Result<(), KeysmithError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO licenses ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    LICENSE_COLUMNS
                ))
                .map_err(store_err)?;

            for license in licenses {
                let binding = license.binding.as_ref();
                stmt.execute(params![
                    license.owner_id,
                    license.application_id,
                    license.key,
                    license.note,
                    format_time(&license.created_at),
                    license.duration.to_string(),
                    license.generated_by,
                    license.status.as_str(),
                    binding.map(|b| format_time(&b.used_at)),
                    binding.map(|b| format_time(&b.expires_at)),
                    binding.map(|b| b.ip.as_str()),
                    binding.map(|b| b.hwid.as_str()),
                ])
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        KeysmithError::DuplicateKey
                    } else {
                        store_err(e)
                    }
                })?;
            }
        }
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    fn find_license(&self, scope: Scope<'_>, key: &str) -> Result<Option<License>, KeysmithError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM licenses WHERE owner_id = ? AND application_id = ? AND key = ?",
                    LICENSE_COLUMNS
                ),
                params![scope.owner_id, scope.application_id, key],
                LicenseRow::from_row,
            )
            .optional()
            .map_err(store_err)?;
        row.map(LicenseRow::into_license).transpose()
    }

    fn list_licenses(&self, scope: Scope<'_>) -> Result<Vec<License>, KeysmithError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM licenses WHERE owner_id = ? AND application_id = ? ORDER BY rowid",
                LICENSE_COLUMNS
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                params![scope.owner_id, scope.application_id],
                LicenseRow::from_row,
            )
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        rows.into_iter().map(LicenseRow::into_license).collect()
    }

    fn bind_license(
        &self,
        scope: Scope<'_>,
        key: &str,
        binding: &Binding,
    ) -> Result<bool, KeysmithError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE licenses SET status = ?, used_at = ?, expires_at = ?, ip = ?, hwid = ?
                 WHERE owner_id = ? AND application_id = ? AND key = ? AND status = ?",
                params![
                    LicenseStatus::Used.as_str(),
                    format_time(&binding.used_at),
                    format_time(&binding.expires_at),
                    binding.ip,
                    binding.hwid,
                    scope.owner_id,
                    scope.application_id,
                    key,
                    LicenseStatus::NotUsed.as_str(),
                ],
            )
            .map_err(store_err)?;
        Ok(changed == 1)
    }

    fn ban_license(&self, scope: Scope<'_>, key: &str) -> Result<(), KeysmithError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE licenses SET status = ?
                 WHERE owner_id = ? AND application_id = ? AND key = ?",
                params![
                    LicenseStatus::Banned.as_str(),
                    scope.owner_id,
                    scope.application_id,
                    key
                ],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(KeysmithError::LicenseNotFound);
        }
        Ok(())
    }

    fn delete_license(&self, scope: Scope<'_>, key: &str) -> Result<(), KeysmithError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM licenses WHERE owner_id = ? AND application_id = ? AND key = ?",
                params![scope.owner_id, scope.application_id, key],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(KeysmithError::LicenseNotFound);
        }
        Ok(())
    }

    fn delete_licenses(&self, scope: Scope<'_>, keys: &[String]) -> Result<usize, KeysmithError> {
        let unique: BTreeSet<&str> = keys.iter().map(String::as_str).collect();

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "DELETE FROM licenses WHERE owner_id = ? AND application_id = ? AND key = ?",
                )
                .map_err(store_err)?;
            for key in &unique {
                let changed = stmt
                    .execute(params![scope.owner_id, scope.application_id, key])
                    .map_err(store_err)?;
                if changed == 0 {
                    debug!(key = %key, "Bulk delete aborted, key missing");
                    return Err(KeysmithError::LicenseNotFound);
                }
            }
        }
        tx.commit().map_err(store_err)?;
        Ok(unique.len())
    }

    fn delete_all_licenses(&self, scope: Scope<'_>) -> Result<usize, KeysmithError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM licenses WHERE owner_id = ? AND application_id = ?",
            params![scope.owner_id, scope.application_id],
        )
        .map_err(store_err)
    }
}

struct ApplicationRow {
    id: String,
    name: String,
    owner_id: String,
    created_at: String,
}

impl ApplicationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            owner_id: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn into_application(self) -> Result<Application, KeysmithError> {
        Ok(Application {
            created_at: parse_time("created_at", &self.created_at)?,
            id: self.id,
            name: self.name,
            owner_id: self.owner_id,
        })
    }
}

struct LicenseRow {
    owner_id: String,
    application_id: String,
    key: String,
    note: String,
    created_at: String,
    duration: String,
    generated_by: String,
    status: String,
    used_at: Option<String>,
    expires_at: Option<String>,
    ip: Option<String>,
    hwid: Option<String>,
}

impl LicenseRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_id: row.get(0)?,
            application_id: row.get(1)?,
            key: row.get(2)?,
            note: row.get(3)?,
            created_at: row.get(4)?,
            duration: row.get(5)?,
            generated_by: row.get(6)?,
            status: row.get(7)?,
            used_at: row.get(8)?,
            expires_at: row.get(9)?,
            ip: row.get(10)?,
            hwid: row.get(11)?,
        })
    }

    /// Parse stored text back into a record. Anything unparseable is a
    /// corrupt row and surfaces as `Internal`.
    fn into_license(self) -> Result<License, KeysmithError> {
        let binding = match (self.used_at, self.expires_at) {
            (Some(used_at), Some(expires_at)) => Some(Binding {
                used_at: parse_time("used_at", &used_at)?,
                expires_at: parse_time("expires_at", &expires_at)?,
                ip: self.ip.unwrap_or_default(),
                hwid: self.hwid.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(License {
            created_at: parse_time("created_at", &self.created_at)?,
            duration: self.duration.parse().map_err(|e| {
                KeysmithError::Internal(format!("corrupt duration '{}': {}", self.duration, e))
            })?,
            status: self.status.parse()?,
            owner_id: self.owner_id,
            application_id: self.application_id,
            key: self.key,
            note: self.note,
            generated_by: self.generated_by,
            binding,
        })
    }
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(column: &str, raw: &str) -> Result<DateTime<Utc>, KeysmithError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| KeysmithError::Internal(format!("corrupt {} '{}': {}", column, raw, e)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn store_err(err: rusqlite::Error) -> KeysmithError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
            ) =>
        {
            KeysmithError::StoreUnavailable(err.to_string())
        }
        _ => KeysmithError::Internal(format!("store error: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::duration::{DurationUnit, LicenseDuration};
    use chrono::TimeZone;

    const OWNER: &str = "user-1";
    const APP: &str = "3f2b8c1e-9a4d-4c7b-8e21-0d5f6a7b8c9d";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn store_with_app() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_application(&Application {
                id: APP.to_string(),
                name: "Editor".to_string(),
                owner_id: OWNER.to_string(),
                created_at: t0(),
            })
            .unwrap();
        store
    }

    fn license(key: &str) -> License {
        License::unused(
            OWNER,
            APP,
            key.to_string(),
            "batch",
            t0(),
            LicenseDuration::new(3, DurationUnit::Day).unwrap(),
            "alice",
        )
    }

    fn binding(hwid: &str) -> Binding {
        Binding {
            used_at: t0(),
            expires_at: Utc.with_ymd_and_hms(2025, 1, 18, 12, 0, 0).unwrap(),
            ip: "10.0.0.1".to_string(),
            hwid: hwid.to_string(),
        }
    }

    fn scope() -> Scope<'static> {
        Scope::new(OWNER, APP)
    }

    #[test]
    fn test_application_name_unique_per_owner() {
        let store = store_with_app();
        let dup = Application {
            id: "00000000-0000-4000-8000-000000000001".to_string(),
            name: "Editor".to_string(),
            owner_id: OWNER.to_string(),
            created_at: t0(),
        };
        assert!(matches!(
            store.insert_application(&dup),
            Err(KeysmithError::ApplicationExists { .. })
        ));

        let other_owner = Application {
            owner_id: "user-2".to_string(),
            ..dup
        };
        assert!(store.insert_application(&other_owner).is_ok());
    }

    #[test]
    fn test_find_application_is_owner_scoped() {
        let store = store_with_app();
        assert!(store.find_application(OWNER, APP).unwrap().is_some());
        assert!(store.find_application("user-2", APP).unwrap().is_none());
        assert_eq!(store.application_owner(APP).unwrap().as_deref(), Some(OWNER));
        assert_eq!(store.application_owner("missing").unwrap(), None);
    }

    #[test]
    fn test_license_roundtrip_through_rows() {
        let store = store_with_app();
        store.insert_licenses(&[license("PRO-A"), license("PRO-B")]).unwrap();

        let listed = store.list_licenses(scope()).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], license("PRO-A"));
        assert_eq!(listed[1].key, "PRO-B");
    }

    #[test]
    fn test_duplicate_key_rolls_back_batch() {
        let store = store_with_app();
        store.insert_licenses(&[license("PRO-A")]).unwrap();

        let result = store.insert_licenses(&[license("PRO-B"), license("PRO-A")]);
        assert!(matches!(result, Err(KeysmithError::DuplicateKey)));
        assert_eq!(store.list_licenses(scope()).unwrap().len(), 1);
    }

    #[test]
    fn test_bind_is_compare_and_swap() {
        let store = store_with_app();
        store.insert_licenses(&[license("PRO-A")]).unwrap();

        assert!(store.bind_license(scope(), "PRO-A", &binding("H1")).unwrap());
        assert!(!store.bind_license(scope(), "PRO-A", &binding("H2")).unwrap());

        let stored = store.find_license(scope(), "PRO-A").unwrap().unwrap();
        assert_eq!(stored.status, LicenseStatus::Used);
        assert_eq!(stored.binding.unwrap().hwid, "H1");
    }

    #[test]
    fn test_ban_keeps_binding_and_is_idempotent() {
        let store = store_with_app();
        store.insert_licenses(&[license("PRO-A")]).unwrap();
        store.bind_license(scope(), "PRO-A", &binding("H1")).unwrap();

        store.ban_license(scope(), "PRO-A").unwrap();
        store.ban_license(scope(), "PRO-A").unwrap();

        let stored = store.find_license(scope(), "PRO-A").unwrap().unwrap();
        assert_eq!(stored.status, LicenseStatus::Banned);
        assert!(stored.binding.is_some());

        assert!(matches!(
            store.ban_license(scope(), "PRO-Z"),
            Err(KeysmithError::LicenseNotFound)
        ));
    }

    #[test]
    fn test_bulk_delete_is_all_or_nothing() {
        let store = store_with_app();
        store
            .insert_licenses(&[license("K1"), license("K3")])
            .unwrap();

        let keys = vec!["K1".to_string(), "K2".to_string(), "K3".to_string()];
        assert!(matches!(
            store.delete_licenses(scope(), &keys),
            Err(KeysmithError::LicenseNotFound)
        ));
        assert_eq!(store.list_licenses(scope()).unwrap().len(), 2);

        let keys = vec!["K1".to_string(), "K1".to_string(), "K3".to_string()];
        assert_eq!(store.delete_licenses(scope(), &keys).unwrap(), 2);
        assert!(store.list_licenses(scope()).unwrap().is_empty());
    }

    #[test]
    fn test_other_owner_cannot_touch_licenses() {
        let store = store_with_app();
        store.insert_licenses(&[license("PRO-A")]).unwrap();
        let foreign = Scope::new("user-2", APP);

        assert!(store.find_license(foreign, "PRO-A").unwrap().is_none());
        assert!(matches!(
            store.delete_license(foreign, "PRO-A"),
            Err(KeysmithError::LicenseNotFound)
        ));
        assert_eq!(store.delete_all_licenses(foreign).unwrap(), 0);
        assert_eq!(store.list_licenses(scope()).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_application_cascades() {
        let store = store_with_app();
        store.insert_licenses(&[license("K1"), license("K2")]).unwrap();

        assert!(matches!(
            store.delete_application("user-2", APP),
            Err(KeysmithError::ApplicationNotFound)
        ));
        assert_eq!(store.list_licenses(scope()).unwrap().len(), 2);

        assert_eq!(store.delete_application(OWNER, APP).unwrap(), 2);
        assert!(store.list_applications(OWNER).unwrap().is_empty());
        assert!(store.list_licenses(scope()).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_expiry_is_internal() {
        let store = store_with_app();
        store.insert_licenses(&[license("PRO-A")]).unwrap();
        store.bind_license(scope(), "PRO-A", &binding("H1")).unwrap();

        store
            .lock()
            .unwrap()
            .execute("UPDATE licenses SET expires_at = 'next tuesday'", [])
            .unwrap();

        assert!(matches!(
            store.find_license(scope(), "PRO-A"),
            Err(KeysmithError::Internal(_))
        ));
    }

    #[test]
    fn test_held_connection_surfaces_unavailable() {
        let conn = Connection::open_in_memory().unwrap();
        let store = SqliteStore::from_connection(conn, Duration::from_millis(50)).unwrap();
        let held = store.lock().unwrap();

        let waiter = store.clone();
        let result = std::thread::spawn(move || waiter.list_applications(OWNER))
            .join()
            .unwrap();
        assert!(matches!(result, Err(KeysmithError::StoreUnavailable(_))));

        drop(held);
        assert!(store.list_applications(OWNER).unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keysmith.db");
        let store = SqliteStore::open(&path, Duration::from_millis(100)).unwrap();
        assert!(store.list_applications(OWNER).unwrap().is_empty());
        assert!(path.exists());
    }
}
