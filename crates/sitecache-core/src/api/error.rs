use serde::Deserialize;
use thiserror::Error;

use crate::auth::BrokerError;
use crate::utils::truncate_body;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Credential rejected after refresh")]
    CredentialRejected,

    #[error("Rate limited - retries exhausted")]
    RateLimited,

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Deserialize)]
struct GraphErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Deserialize)]
struct GraphErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl ApiError {
    /// Pull a readable detail out of an upstream error body.
    /// Prefers `error.message` (with `error.code`), falling back to the raw body.
    pub fn detail_from_body(body: &str) -> String {
        match serde_json::from_str::<GraphErrorEnvelope>(body) {
            Ok(GraphErrorEnvelope {
                error: GraphErrorBody {
                    code: Some(code),
                    message: Some(message),
                },
            }) => truncate_body(&format!("{}: {}", code, message), MAX_ERROR_BODY_LENGTH),
            Ok(GraphErrorEnvelope {
                error: GraphErrorBody {
                    message: Some(message),
                    ..
                },
            }) => truncate_body(&message, MAX_ERROR_BODY_LENGTH),
            _ => truncate_body(body, MAX_ERROR_BODY_LENGTH),
        }
    }

    /// Map a terminal (non-retried) client error status.
    /// 401, 429 and 5xx are handled by the retry loop before this is reached.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = Self::detail_from_body(body);
        match status.as_u16() {
            400 => ApiError::InvalidQuery(detail),
            401 => ApiError::CredentialRejected,
            403 => ApiError::Forbidden(detail),
            404 => ApiError::NotFound(detail),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::UpstreamUnavailable(detail),
            code => ApiError::Rejected {
                status: code,
                detail,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_maps_client_errors() {
        let body = r#"{"error":{"code":"invalidRequest","message":"Invalid filter clause"}}"#;
        assert_eq!(
            ApiError::from_status(StatusCode::BAD_REQUEST, body),
            ApiError::InvalidQuery("invalidRequest: Invalid filter clause".to_string())
        );
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, "{}"),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, ""),
            ApiError::Forbidden(_)
        ));
        assert_eq!(
            ApiError::from_status(StatusCode::CONFLICT, "busy"),
            ApiError::Rejected {
                status: 409,
                detail: "busy".to_string()
            }
        );
    }

    #[test]
    fn test_detail_falls_back_to_truncated_body() {
        let body = "x".repeat(600);
        let detail = ApiError::detail_from_body(&body);
        assert!(detail.contains("truncated, 600 total bytes"));
    }

    #[test]
    fn test_broker_errors_display_transparently() {
        let err: ApiError = BrokerError::SessionInvalidOrExpired.into();
        assert_eq!(err.to_string(), "Session is invalid or expired");
    }
}
