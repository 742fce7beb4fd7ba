//! Route handlers and request extractors.

use super::error::ApiError;
use super::AppState;
use crate::client::identity::parse_bearer;
use crate::protocol::models::{format_display_time, Application, Identity, License, LicenseView};
use crate::protocol::requests::{
    is_valid_application_id, is_valid_token, CreateApplicationRequest, DeleteLicensesRequest,
    GenerateLicensesRequest, RedeemLicenseRequest, MAX_KEY_LEN,
};
use crate::KeysmithError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;

/// Caller identity verified from the bearer token.
pub struct AuthUser(pub Identity);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let token = parse_bearer(header)?.to_string();
        let identity = state.authenticator.authenticate(&token).await?;
        Ok(Self(identity))
    }
}

/// Address of the calling client.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(client_ip(&parts.headers, peer)))
    }
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header("x-real-ip") {
        return real.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Run a synchronous engine call off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, KeysmithError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KeysmithError::Internal(format!("engine task failed: {}", e)))?
        .map_err(ApiError::from)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(v)| v).map_err(ApiError::invalid_json)
}

fn check_application_id(id: &str) -> Result<(), ApiError> {
    if is_valid_application_id(id) {
        Ok(())
    } else {
        Err(KeysmithError::ValidationFailed(
            "application_id: must be a 36 character UUID".to_string(),
        )
        .into())
    }
}

fn check_license_id(id: &str) -> Result<(), ApiError> {
    if is_valid_token(id, MAX_KEY_LEN) {
        Ok(())
    } else {
        Err(KeysmithError::ValidationFailed(
            "license_id: must match ^[A-Za-z0-9-]+$ (1 to 100 characters)".to_string(),
        )
        .into())
    }
}

fn views(licenses: &[License]) -> Vec<LicenseView> {
    licenses.iter().map(LicenseView::from).collect()
}

#[derive(Serialize)]
struct ApplicationWithLicenses {
    #[serde(flatten)]
    application: Application,
    licenses: Vec<LicenseView>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn create_application(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    payload: Result<Json<CreateApplicationRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let name = body(payload)?.validate()?;
    let manager = state.manager.clone();
    let application =
        run_blocking(move || manager.create_application(&identity.subject, &name)).await?;
    Ok(Json(json!({ "application": application })))
}

pub async fn delete_application(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(application_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_application_id(&application_id)?;
    let manager = state.manager.clone();
    run_blocking(move || manager.delete_application(&identity.subject, &application_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn dashboard(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let manager = state.manager.clone();
    let owner_id = identity.subject.clone();
    let entries = run_blocking(move || manager.dashboard(&owner_id)).await?;

    let applications: Vec<ApplicationWithLicenses> = entries
        .into_iter()
        .map(|entry| ApplicationWithLicenses {
            licenses: views(&entry.licenses),
            application: entry.application,
        })
        .collect();
    Ok(Json(json!({ "applications": applications, "user": identity })))
}

pub async fn list_licenses(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(application_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    check_application_id(&application_id)?;
    let manager = state.manager.clone();
    let licenses =
        run_blocking(move || manager.list_licenses(&identity.subject, &application_id)).await?;
    Ok(Json(json!({ "licenses": views(&licenses) })))
}

pub async fn generate_licenses(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(application_id): Path<String>,
    payload: Result<Json<GenerateLicensesRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_application_id(&application_id)?;
    let spec = body(payload)?.validate()?;

    let manager = state.manager.clone();
    let caller = identity.clone();
    let licenses =
        run_blocking(move || manager.generate_licenses(&caller, &application_id, &spec)).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "licenses": views(&licenses), "user": identity })),
    ))
}

pub async fn delete_licenses(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(application_id): Path<String>,
    payload: Result<Json<DeleteLicensesRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    check_application_id(&application_id)?;
    let request = body(payload)?;
    request.validate()?;

    let manager = state.manager.clone();
    run_blocking(move || {
        manager.delete_licenses(&identity.subject, &application_id, &request.keys)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_all_licenses(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(application_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_application_id(&application_id)?;
    let manager = state.manager.clone();
    run_blocking(move || manager.delete_all_licenses(&identity.subject, &application_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_license(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((application_id, license_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    check_application_id(&application_id)?;
    check_license_id(&license_id)?;
    let manager = state.manager.clone();
    run_blocking(move || {
        manager.delete_license(&identity.subject, &application_id, &license_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn ban_license(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((application_id, license_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    check_application_id(&application_id)?;
    check_license_id(&license_id)?;
    let manager = state.manager.clone();
    run_blocking(move || manager.ban_license(&identity.subject, &application_id, &license_id))
        .await?;
    Ok(Json(json!({ "message": "License banned successfully" })))
}

pub async fn redeem_license(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(application_id): Path<String>,
    payload: Result<Json<RedeemLicenseRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    check_application_id(&application_id)?;
    let request = body(payload)?;
    request.validate()?;

    let manager = state.manager.clone();
    let redemption = run_blocking(move || {
        manager.redeem_license(&application_id, &request.key, &request.hwid, &ip)
    })
    .await?;

    Ok(Json(json!({
        "message": "Successfully logged in",
        "expires_on": format_display_time(&redemption.expires_at),
    })))
}
