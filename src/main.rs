//! Keysmith license server.
//!
//! Serves the license lifecycle over HTTP, backed by a SQLite database and
//! an OpenID-Connect provider for owner authentication.
//!
//! Usage:
//!   keysmith --bind 0.0.0.0:8001 --database data/keysmith.db
//!
//! Configuration is read from the environment (and a `.env` file if
//! present); flags override the bind address and database path.

use anyhow::{Context, Result};
use clap::Parser;
use keysmith::client::identity::IdentityClient;
use keysmith::http::{self, AppState};
use keysmith::{KeysmithConfig, LicenseManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keysmith")]
#[command(about = "License key issuance and redemption server")]
struct Args {
    /// Socket address to listen on (overrides KEYSMITH_BIND)
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database file (overrides DATABASE_URL)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let dotenv = dotenvy::dotenv().ok();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    if let Some(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let mut config = KeysmithConfig::from_env().context("invalid configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    config.validate().context("invalid configuration")?;

    let identity = config
        .identity
        .clone()
        .context("KEYCLOAK_URL and REALM must be set to serve private routes")?;
    let authenticator = IdentityClient::new(&identity)?;
    info!(userinfo = %authenticator.userinfo_url(), "Identity provider configured");

    let bind_addr = config.bind_addr.clone();
    let manager = tokio::task::spawn_blocking(move || LicenseManager::new(config))
        .await
        .context("store initialisation task failed")??;

    let active = manager.config();
    info!(
        database = %active.database_path.display(),
        cache = ?active.cache_backend,
        listing_ttl_secs = active.listing_ttl.as_secs(),
        store_timeout_ms = active.store_timeout.as_millis() as u64,
        "License store ready"
    );

    let state = AppState {
        manager: Arc::new(manager),
        authenticator: Arc::new(authenticator),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "Keysmith listening");

    http::serve(listener, state, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Keysmith stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        // No signal handler: run until killed.
        Err(_) => std::future::pending::<()>().await,
    }
}
