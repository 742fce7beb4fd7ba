//! Reqwest-based client for the OpenID-Connect identity provider.
//!
//! Bearer tokens are verified by calling the realm's userinfo endpoint; the
//! returned claims are reduced once to an [`Identity`] and nothing else from
//! the provider travels further into the service.

use crate::config::IdentityProviderConfig;
use crate::protocol::models::Identity;
use crate::KeysmithError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// Turns a bearer credential into a verified identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `token` and return who it belongs to.
    ///
    /// Any failure, including an unreachable provider, is `Unauthorized`.
    async fn authenticate(&self, token: &str) -> Result<Identity, KeysmithError>;
}

/// Userinfo claims we read; everything else is ignored.
#[derive(Debug, Deserialize)]
struct UserInfoClaims {
    sub: String,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl UserInfoClaims {
    fn into_identity(self) -> Result<Identity, KeysmithError> {
        if self.sub.trim().is_empty() {
            return Err(KeysmithError::Unauthorized(
                "userinfo response has no subject".to_string(),
            ));
        }
        let display_name = [self.preferred_username, self.name]
            .into_iter()
            .flatten()
            .find(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.sub.clone());
        Ok(Identity::new(self.sub, display_name))
    }
}

/// Identity provider client.
pub struct IdentityClient {
    client: Client,
    userinfo_url: String,
    user_agent: String,
}

impl IdentityClient {
    /// Create a client for the configured realm.
    pub fn new(config: &IdentityProviderConfig) -> Result<Self, KeysmithError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KeysmithError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            userinfo_url: config.userinfo_url(),
            user_agent: build_user_agent(),
        })
    }

    /// Endpoint tokens are checked against.
    pub fn userinfo_url(&self) -> &str {
        &self.userinfo_url
    }
}

#[async_trait]
impl Authenticator for IdentityClient {
    async fn authenticate(&self, token: &str) -> Result<Identity, KeysmithError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                KeysmithError::Unauthorized(format!("identity provider unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "Identity provider rejected token");
            return Err(KeysmithError::Unauthorized(format!(
                "identity provider rejected token ({})",
                status.as_u16()
            )));
        }

        let claims: UserInfoClaims = response.json().await.map_err(|e| {
            KeysmithError::Unauthorized(format!("malformed userinfo response: {}", e))
        })?;
        claims.into_identity()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, KeysmithError> {
    let header = header.ok_or_else(|| {
        KeysmithError::Unauthorized("Authorization header missing".to_string())
    })?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            KeysmithError::Unauthorized("Authorization header must be 'Bearer <token>'".to_string())
        })?;
    Ok(token)
}

/// User-Agent sent to the identity provider: `keysmith/<version>`.
pub fn build_user_agent() -> String {
    format!("keysmith/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::time::Duration;

    fn provider(base_url: &str) -> IdentityProviderConfig {
        IdentityProviderConfig {
            base_url: base_url.to_string(),
            realm: "demo".to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    async fn userinfo(headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some("Bearer good") => Ok(Json(serde_json::json!({
                "sub": "user-1",
                "preferred_username": "alice",
                "email": "alice@example.com"
            }))),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }

    async fn spawn_provider() -> String {
        let app = Router::new().route(
            "/realms/demo/protocol/openid-connect/userinfo",
            get(userinfo),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer(Some("Bearer abc.def")).unwrap(), "abc.def");
        assert!(matches!(parse_bearer(None), Err(KeysmithError::Unauthorized(_))));
        assert!(parse_bearer(Some("Basic abc")).is_err());
        assert!(parse_bearer(Some("Bearer   ")).is_err());
    }

    #[test]
    fn test_claims_display_name_fallback() {
        let claims: UserInfoClaims =
            serde_json::from_str(r#"{"sub":"s-1","name":"Alice A."}"#).unwrap();
        assert_eq!(claims.into_identity().unwrap().display_name, "Alice A.");

        let claims: UserInfoClaims = serde_json::from_str(r#"{"sub":"s-1"}"#).unwrap();
        assert_eq!(claims.into_identity().unwrap().display_name, "s-1");

        let claims: UserInfoClaims = serde_json::from_str(r#"{"sub":""}"#).unwrap();
        assert!(claims.into_identity().is_err());
    }

    #[test]
    fn test_client_userinfo_url() {
        let client = IdentityClient::new(&provider("https://auth.example.com")).unwrap();
        assert_eq!(
            client.userinfo_url(),
            "https://auth.example.com/realms/demo/protocol/openid-connect/userinfo"
        );
    }

    #[test]
    fn test_build_user_agent() {
        assert!(build_user_agent().starts_with("keysmith/"));
    }

    #[tokio::test]
    async fn test_authenticate_against_provider() {
        let base = spawn_provider().await;
        let client = IdentityClient::new(&provider(&base)).unwrap();

        let identity = client.authenticate("good").await.unwrap();
        assert_eq!(identity, Identity::new("user-1", "alice"));

        let result = client.authenticate("bad").await;
        assert!(matches!(result, Err(KeysmithError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_unauthorized() {
        let client = IdentityClient::new(&provider("http://127.0.0.1:9")).unwrap();
        let result = client.authenticate("good").await;
        assert!(matches!(result, Err(KeysmithError::Unauthorized(_))));
    }
}
