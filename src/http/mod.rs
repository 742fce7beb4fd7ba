//! HTTP surface: an axum router over [`LicenseManager`].
//!
//! All routes live under `/api/v1`; `/private` routes require a bearer
//! token verified by the configured [`Authenticator`], `/public` routes are
//! open to license holders.

pub mod error;
mod handlers;

use crate::client::identity::Authenticator;
use crate::manager::LicenseManager;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use error::{ApiError, ErrorBody};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The lifecycle engine.
    pub manager: Arc<LicenseManager>,
    /// Bearer token verifier for private routes.
    pub authenticator: Arc<dyn Authenticator>,
}

/// Build the full router.
pub fn build_router(state: AppState) -> Router {
    let private = Router::new()
        .route("/applications", post(handlers::create_application))
        .route("/applications/data", get(handlers::dashboard))
        .route(
            "/applications/{application_id}",
            delete(handlers::delete_application),
        )
        .route(
            "/applications/{application_id}/licenses",
            get(handlers::list_licenses)
                .post(handlers::generate_licenses)
                .delete(handlers::delete_licenses),
        )
        .route(
            "/applications/{application_id}/licenses-all",
            delete(handlers::delete_all_licenses),
        )
        .route(
            "/applications/{application_id}/licenses/{license_id}",
            delete(handlers::delete_license),
        )
        .route(
            "/applications/{application_id}/licenses/{license_id}/ban",
            patch(handlers::ban_license),
        );

    let public = Router::new().route(
        "/applications/{application_id}/redeem-license",
        post(handlers::redeem_license),
    );

    let api = Router::new()
        .route("/health", get(handlers::health))
        .nest("/private", private)
        .nest("/public", public);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// Peer addresses are recorded so redemption can fall back to the socket
/// address when no proxy header is present.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if response.status().is_server_error() {
        warn!(%method, %path, status, elapsed_ms, "Request failed");
    } else {
        info!(%method, %path, status, elapsed_ms, "Request handled");
    }
    response
}
