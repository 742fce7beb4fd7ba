//! End-to-end license lifecycle through the engine API.

mod common;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::{alice, bob, clock_at, manager};
use keysmith::cache::FileCache;
use keysmith::crypto::keygen::matches_mask;
use keysmith::policy::duration::{DurationUnit, LicenseDuration};
use keysmith::protocol::models::{GenerationSpec, LicenseView};
use keysmith::store::SqliteStore;
use keysmith::{KeysmithConfig, KeysmithError, LicenseManager, LicenseStatus, MockClock};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn monthly(count: usize) -> GenerationSpec {
    GenerationSpec {
        count,
        prefix: "PRO".to_string(),
        mask: "XXXX-XXXX".to_string(),
        note: "launch".to_string(),
        duration: LicenseDuration::new(1, DurationUnit::Month).unwrap(),
    }
}

#[test]
fn test_generate_redeem_and_conflict() {
    let clock = clock_at(2025, 1, 31, 10, 0);
    let engine = manager(clock.clone());

    let app = engine.create_application("user-alice", "Editor").unwrap();
    let licenses = engine.generate_licenses(&alice(), &app.id, &monthly(3)).unwrap();
    assert_eq!(licenses.len(), 3);
    for license in &licenses {
        assert!(matches_mask("PRO", "XXXX-XXXX", &license.key), "{}", license.key);
        assert_eq!(license.status, LicenseStatus::NotUsed);

        let view = LicenseView::from(license);
        assert_eq!(view.used_on, "N/A");
        assert_eq!(view.expires_on, "N/A");
        assert_eq!(view.hwid, "N/A");
        assert_eq!(view.duration, "1 Month(s)");
        assert_eq!(view.generated_by, "alice");
    }

    let key = &licenses[0].key;
    let first = engine
        .redeem_license(&app.id, key, "ABC123", "203.0.113.9")
        .unwrap();
    assert!(first.newly_bound);
    // Jan 31 plus one month clamps to the end of February.
    assert_eq!(
        first.expires_at,
        Utc.with_ymd_and_hms(2025, 2, 28, 10, 0, 0).unwrap()
    );

    clock.advance(ChronoDuration::days(3));
    let again = engine
        .redeem_license(&app.id, key, "ABC123", "198.51.100.1")
        .unwrap();
    assert!(!again.newly_bound);
    assert_eq!(again.expires_at, first.expires_at);

    let err = engine
        .redeem_license(&app.id, key, "XYZ999", "203.0.113.9")
        .unwrap_err();
    assert!(matches!(err, KeysmithError::HwidMismatch));

    let stored = engine.list_licenses("user-alice", &app.id).unwrap();
    let bound = stored.iter().find(|l| &l.key == key).unwrap();
    assert_eq!(bound.status, LicenseStatus::Used);
    let binding = bound.binding.as_ref().unwrap();
    assert_eq!(binding.hwid, "ABC123");
    assert_eq!(binding.ip, "203.0.113.9");
}

#[test]
fn test_expiry_is_derived_at_check_time() {
    let clock = clock_at(2025, 3, 1, 8, 0);
    let engine = manager(clock.clone());
    let app = engine.create_application("user-alice", "Editor").unwrap();
    let key = engine.generate_licenses(&alice(), &app.id, &monthly(1)).unwrap()[0]
        .key
        .clone();

    let redemption = engine.redeem_license(&app.id, &key, "HW1", "10.0.0.1").unwrap();

    clock.advance(ChronoDuration::days(31));
    assert!(engine.redeem_license(&app.id, &key, "HW1", "10.0.0.1").is_ok());

    clock.advance(ChronoDuration::seconds(1));
    let err = engine.redeem_license(&app.id, &key, "HW1", "10.0.0.1").unwrap_err();
    assert!(matches!(err, KeysmithError::LicenseExpired));

    // Stored status stays Used; expiry is never written back.
    let stored = engine.list_licenses("user-alice", &app.id).unwrap();
    assert_eq!(stored[0].status, LicenseStatus::Used);
    assert_eq!(
        stored[0].binding.as_ref().unwrap().expires_at,
        redemption.expires_at
    );
}

#[test]
fn test_ban_blocks_every_redemption() {
    let clock = clock_at(2025, 1, 15, 12, 0);
    let engine = manager(clock);
    let app = engine.create_application("user-alice", "Editor").unwrap();
    let licenses = engine.generate_licenses(&alice(), &app.id, &monthly(2)).unwrap();

    engine
        .redeem_license(&app.id, &licenses[0].key, "HW1", "10.0.0.1")
        .unwrap();
    engine.ban_license("user-alice", &app.id, &licenses[0].key).unwrap();
    engine.ban_license("user-alice", &app.id, &licenses[1].key).unwrap();
    // Idempotent.
    engine.ban_license("user-alice", &app.id, &licenses[1].key).unwrap();

    for license in &licenses {
        let err = engine
            .redeem_license(&app.id, &license.key, "HW1", "10.0.0.1")
            .unwrap_err();
        assert!(matches!(err, KeysmithError::LicenseBanned));
    }

    let stored = engine.list_licenses("user-alice", &app.id).unwrap();
    assert!(stored.iter().all(|l| l.status == LicenseStatus::Banned));
}

#[test]
fn test_bulk_delete_is_all_or_nothing() {
    let clock = clock_at(2025, 1, 15, 12, 0);
    let engine = manager(clock);
    let app = engine.create_application("user-alice", "Editor").unwrap();
    let licenses = engine.generate_licenses(&alice(), &app.id, &monthly(3)).unwrap();
    let k1 = licenses[0].key.clone();
    let k3 = licenses[2].key.clone();

    let err = engine
        .delete_licenses(
            "user-alice",
            &app.id,
            &[k1.clone(), "PRO-MISS-ING0".to_string(), k3.clone()],
        )
        .unwrap_err();
    assert!(matches!(err, KeysmithError::LicenseNotFound));
    assert_eq!(engine.list_licenses("user-alice", &app.id).unwrap().len(), 3);

    let removed = engine
        .delete_licenses("user-alice", &app.id, &[k1, k3])
        .unwrap();
    assert_eq!(removed, 2);
    let remaining = engine.list_licenses("user-alice", &app.id).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, licenses[1].key);
}

#[test]
fn test_owners_are_isolated() {
    let clock = clock_at(2025, 1, 15, 12, 0);
    let engine = manager(clock);
    let app = engine.create_application("user-alice", "Editor").unwrap();
    let key = engine.generate_licenses(&alice(), &app.id, &monthly(1)).unwrap()[0]
        .key
        .clone();

    // Same name is fine for a different owner.
    engine.create_application("user-bob", "Editor").unwrap();
    let err = engine.create_application("user-alice", "Editor").unwrap_err();
    assert!(matches!(err, KeysmithError::ApplicationExists { .. }));

    assert!(matches!(
        engine.list_licenses("user-bob", &app.id).unwrap_err(),
        KeysmithError::ApplicationNotFound
    ));
    assert!(matches!(
        engine.generate_licenses(&bob(), &app.id, &monthly(1)).unwrap_err(),
        KeysmithError::ApplicationNotFound
    ));
    assert!(matches!(
        engine.ban_license("user-bob", &app.id, &key).unwrap_err(),
        KeysmithError::ApplicationNotFound
    ));
    assert!(matches!(
        engine.delete_application("user-bob", &app.id).unwrap_err(),
        KeysmithError::ApplicationNotFound
    ));

    let dashboard = engine.dashboard("user-bob").unwrap();
    assert_eq!(dashboard.len(), 1);
    assert!(dashboard[0].licenses.is_empty());
}

#[test]
fn test_listings_follow_mutations() {
    let clock = clock_at(2025, 1, 15, 12, 0);
    let engine = manager(clock);
    let app = engine.create_application("user-alice", "Editor").unwrap();
    assert_eq!(engine.list_applications("user-alice").unwrap().len(), 1);

    let licenses = engine.generate_licenses(&alice(), &app.id, &monthly(2)).unwrap();
    let listed = engine.list_licenses("user-alice", &app.id).unwrap();
    assert!(listed.iter().all(|l| l.status == LicenseStatus::NotUsed));

    engine
        .redeem_license(&app.id, &licenses[0].key, "HW1", "10.0.0.1")
        .unwrap();
    let listed = engine.list_licenses("user-alice", &app.id).unwrap();
    assert_eq!(
        listed.iter().filter(|l| l.status == LicenseStatus::Used).count(),
        1
    );

    engine.delete_license("user-alice", &app.id, &licenses[1].key).unwrap();
    assert_eq!(engine.list_licenses("user-alice", &app.id).unwrap().len(), 1);

    assert_eq!(engine.delete_all_licenses("user-alice", &app.id).unwrap(), 1);
    assert!(engine.list_licenses("user-alice", &app.id).unwrap().is_empty());
    assert_eq!(engine.delete_all_licenses("user-alice", &app.id).unwrap(), 0);

    engine.delete_application("user-alice", &app.id).unwrap();
    assert!(engine.list_applications("user-alice").unwrap().is_empty());
    assert!(matches!(
        engine.redeem_license(&app.id, &licenses[0].key, "HW1", "10.0.0.1"),
        Err(KeysmithError::LicenseNotFound)
    ));
}

#[test]
fn test_file_backed_engine_persists() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("data").join("keysmith.db");
    let clock = clock_at(2025, 1, 15, 12, 0);

    let build = |clock: Arc<MockClock>| {
        let store = Arc::new(SqliteStore::open(&db, Duration::from_secs(5)).unwrap());
        let cache = Arc::new(
            FileCache::with_path(dir.path().join("cache"), Duration::from_secs(600), clock.clone())
                .unwrap(),
        );
        LicenseManager::with_parts(KeysmithConfig::default(), store, cache, clock)
    };

    let (app_id, key) = {
        let engine = build(clock.clone());
        let app = engine.create_application("user-alice", "Editor").unwrap();
        let licenses = engine.generate_licenses(&alice(), &app.id, &monthly(2)).unwrap();
        // Warm the file cache.
        assert_eq!(engine.list_licenses("user-alice", &app.id).unwrap().len(), 2);
        (app.id, licenses[0].key.clone())
    };

    let engine = build(clock);
    let redemption = engine.redeem_license(&app_id, &key, "HW1", "10.0.0.1").unwrap();
    assert!(redemption.newly_bound);

    let listed = engine.list_licenses("user-alice", &app_id).unwrap();
    let bound = listed.iter().find(|l| l.key == key).unwrap();
    assert_eq!(bound.status, LicenseStatus::Used);
}
