//! Structured JSON error responses.
//!
//! Every failure leaves the service as
//! `{status, error, code, message, details?, timestamp}`. `details` is never
//! sent with 401 or 403.

use crate::KeysmithError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Wire form of an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase of `status`.
    pub error: String,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Extra context, never present on 401/403.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// RFC 3339 UTC time of the response.
    pub timestamp: String,
}

/// An error on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    /// Error with an explicit status and code.
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach details (dropped again for 401/403).
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Request body was not the JSON the route expects.
    pub fn invalid_json(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_JSON", "Invalid JSON payload")
            .with_details(serde_json::Value::String(rejection.body_text()))
    }

    /// HTTP status of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<KeysmithError> for ApiError {
    fn from(err: KeysmithError) -> Self {
        let status = match &err {
            KeysmithError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            KeysmithError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            KeysmithError::LicenseBanned => StatusCode::FORBIDDEN,
            KeysmithError::ApplicationNotFound | KeysmithError::LicenseNotFound => {
                StatusCode::NOT_FOUND
            }
            KeysmithError::HwidMismatch
            | KeysmithError::AlreadyRedeemed
            | KeysmithError::DuplicateKey
            | KeysmithError::ApplicationExists { .. } => StatusCode::CONFLICT,
            KeysmithError::LicenseExpired => StatusCode::GONE,
            KeysmithError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &err {
            KeysmithError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            KeysmithError::Unauthorized(_) => "Invalid or expired token".to_string(),
            e if status.is_server_error() => {
                error!(code = e.code(), error = %e, "Request failed");
                "Internal server error".to_string()
            }
            e => e.to_string(),
        };
        if matches!(err, KeysmithError::StoreUnavailable(_) | KeysmithError::Unauthorized(_)) {
            warn!(code = err.code(), error = %err, "Request rejected");
        }

        Self::new(status, err.code(), message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let details = match self.status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => None,
            _ => self.details,
        };

        let body = ErrorBody {
            status: self.status.as_u16(),
            error: self
                .status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            code: self.code.to_string(),
            message: self.message,
            details,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_status_mapping() {
        let cases = [
            (KeysmithError::ValidationFailed("x".into()), 400),
            (KeysmithError::Unauthorized("x".into()), 401),
            (KeysmithError::LicenseBanned, 403),
            (KeysmithError::LicenseNotFound, 404),
            (KeysmithError::ApplicationNotFound, 404),
            (KeysmithError::HwidMismatch, 409),
            (KeysmithError::AlreadyRedeemed, 409),
            (KeysmithError::DuplicateKey, 409),
            (KeysmithError::LicenseExpired, 410),
            (KeysmithError::StoreUnavailable("busy".into()), 503),
            (KeysmithError::Internal("boom".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status().as_u16(), status);
        }
    }

    #[test]
    fn test_internal_message_is_generic() {
        let err = ApiError::from(KeysmithError::Internal("corrupt expires_at".into()));
        assert_eq!(err.message, "Internal server error");
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    async fn body_of(response: Response) -> ErrorBody {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_forbidden_drops_details() {
        let response = ApiError::new(StatusCode::FORBIDDEN, "LICENSE_BANNED", "License banned")
            .with_details(serde_json::json!({"hwid": "ABC"}))
            .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_of(response).await;
        assert_eq!(body.status, 403);
        assert_eq!(body.error, "Forbidden");
        assert_eq!(body.code, "LICENSE_BANNED");
        assert!(body.details.is_none());
    }

    #[tokio::test]
    async fn test_bad_request_keeps_details() {
        let response = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "bad")
            .with_details(serde_json::json!("license_amount"))
            .into_response();

        let body = body_of(response).await;
        assert_eq!(body.error, "Bad Request");
        assert_eq!(body.details, Some(serde_json::json!("license_amount")));
    }
}
