//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use keysmith::cache::MemoryCache;
use keysmith::client::identity::Authenticator;
use keysmith::http::{self, AppState};
use keysmith::protocol::models::Identity;
use keysmith::store::SqliteStore;
use keysmith::{KeysmithConfig, KeysmithError, LicenseManager, MockClock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Shared mock clock starting at the given UTC minute.
pub fn clock_at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Arc<MockClock> {
    Arc::new(MockClock::new(
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap(),
    ))
}

/// Accepts a fixed set of tokens.
pub struct StaticAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticAuthenticator {
    pub fn new(entries: &[(&str, Identity)]) -> Self {
        Self {
            tokens: entries
                .iter()
                .map(|(t, id)| (t.to_string(), id.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, KeysmithError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| KeysmithError::Unauthorized("unknown token".to_string()))
    }
}

pub fn alice() -> Identity {
    Identity::new("user-alice", "alice")
}

pub fn bob() -> Identity {
    Identity::new("user-bob", "bob")
}

/// Manager over an in-memory store and memory cache.
pub fn manager(clock: Arc<MockClock>) -> LicenseManager {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let cache = Arc::new(MemoryCache::new(Duration::from_secs(600), clock.clone()));
    LicenseManager::with_parts(KeysmithConfig::default(), store, cache, clock)
}

/// Running server plus the clock driving it.
pub struct TestServer {
    pub addr: SocketAddr,
    pub clock: Arc<MockClock>,
    pub client: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Serve a fresh engine on an ephemeral port. Tokens `alice-token` and
/// `bob-token` are accepted.
pub async fn spawn_server() -> TestServer {
    let clock = clock_at(2025, 1, 31, 10, 0);
    let authenticator = StaticAuthenticator::new(&[("alice-token", alice()), ("bob-token", bob())]);
    let state = AppState {
        manager: Arc::new(manager(clock.clone())),
        authenticator: Arc::new(authenticator),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve(listener, state, std::future::pending()));

    TestServer {
        addr,
        clock,
        client: reqwest::Client::new(),
    }
}
