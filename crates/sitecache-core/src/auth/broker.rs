//! Client for the token broker that trades session handles for bearer credentials.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Credential, SessionHandle};
use crate::retry::RetryPolicy;
use crate::utils::truncate_body;

/// Path of the credential exchange endpoint on the broker
const EXCHANGE_PATH: &str = "/api/v1/session/get-credentials";

/// Lifetime assumed when the broker reports no expiry at all
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Header carrying this server's own broker API key
const API_KEY_HEADER: &str = "X-API-Key";

const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failure kinds reported by the broker.
///
/// `Clone` so a single coalesced exchange can hand its outcome to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Session is invalid or expired")]
    SessionInvalidOrExpired,

    #[error("Provider is not configured for this user")]
    ProviderNotConfigured,

    #[error("Insufficient scope for the requested provider")]
    InsufficientScope,

    #[error("Broker rejected this server's credentials")]
    Unauthorized,

    #[error("Broker unavailable: {0}")]
    TransientUnavailable(String),

    #[error("Invalid broker response: {0}")]
    InvalidResponse(String),
}

impl BrokerError {
    /// Only transient failures can change outcome on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::TransientUnavailable(_))
    }

    /// Map a broker error code, falling back to the HTTP status
    pub fn from_response(status: StatusCode, code: Option<&str>, message: &str) -> Self {
        match code {
            Some("session_expired") | Some("invalid_session") => {
                return BrokerError::SessionInvalidOrExpired
            }
            Some("provider_not_configured") => return BrokerError::ProviderNotConfigured,
            Some("insufficient_scope") => return BrokerError::InsufficientScope,
            Some("unauthorized") => return BrokerError::Unauthorized,
            _ => {}
        }
        match status.as_u16() {
            401 => BrokerError::SessionInvalidOrExpired,
            403 => BrokerError::InsufficientScope,
            404 => BrokerError::ProviderNotConfigured,
            408 | 429 | 500..=599 => {
                BrokerError::TransientUnavailable(format!("status {}: {}", status, message))
            }
            _ => BrokerError::InvalidResponse(format!("status {}: {}", status, message)),
        }
    }
}

/// Anything that can exchange a session handle for a credential.
#[async_trait]
pub trait TokenBroker: Send + Sync {
    async fn exchange(&self, session: &SessionHandle) -> Result<Credential, BrokerError>;
}

#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    session_token: &'a str,
    provider: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: Option<String>,
    #[serde(default)]
    token_refreshed: bool,
    expires_at: Option<DateTime<Utc>>,
    expires_in_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    detail: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    error: Option<String>,
    message: Option<String>,
}

/// HTTP client for the broker.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct BrokerClient {
    client: Client,
    base_url: String,
    provider: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl BrokerClient {
    pub fn new(
        base_url: &str,
        provider: &str,
        api_key: Option<String>,
        timeout: std::time::Duration,
        retry: RetryPolicy,
    ) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::InvalidResponse(format!("failed to build client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider: provider.to_string(),
            api_key,
            retry,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// One exchange attempt, no retries
    async fn exchange_once(&self, session: &SessionHandle) -> Result<Credential, BrokerError> {
        let url = format!("{}{}", self.base_url, EXCHANGE_PATH);
        let mut request = self.client.post(&url).json(&ExchangeRequest {
            session_token: session.expose(),
            provider: &self.provider,
        });
        if let Some(ref key) = self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BrokerError::TransientUnavailable("broker request timed out".to_string())
            } else {
                BrokerError::TransientUnavailable(format!("could not reach broker: {}", e))
            }
        })?;

        let status = response.status();
        let received_at = Utc::now();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::TransientUnavailable(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|env| env.detail);
            let code = detail.as_ref().and_then(|d| d.error.clone());
            let message = detail
                .and_then(|d| d.message)
                .unwrap_or_else(|| truncate_body(&body, MAX_ERROR_BODY_LENGTH));
            warn!(
                session = %session.redacted(),
                status = status.as_u16(),
                code = code.as_deref().unwrap_or("unknown"),
                "Broker returned an error"
            );
            return Err(BrokerError::from_response(status, code.as_deref(), &message));
        }

        let parsed: ExchangeResponse = serde_json::from_str(&body)
            .map_err(|e| BrokerError::InvalidResponse(format!("malformed success body: {}", e)))?;
        let secret = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BrokerError::InvalidResponse("broker returned no access_token".to_string()))?;
        let expires_at = match parsed.expires_at {
            Some(at) => at,
            None => {
                let secs = parsed.expires_in_seconds.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
                Duration::try_seconds(secs)
                    .and_then(|lifetime| received_at.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        BrokerError::InvalidResponse(format!("expires_in_seconds out of range: {}", secs))
                    })?
            }
        };

        let credential = Credential::new(secret, expires_at, self.provider.clone());
        info!(
            session = %session.redacted(),
            provider = %self.provider,
            principal = credential.principal().unwrap_or("unknown"),
            refreshed = parsed.token_refreshed,
            expires_in = credential.time_until_expiry(received_at).num_seconds(),
            "Credential obtained from broker"
        );
        Ok(credential)
    }
}

#[async_trait]
impl TokenBroker for BrokerClient {
    /// Exchange with bounded exponential backoff on transient failures only.
    async fn exchange(&self, session: &SessionHandle) -> Result<Credential, BrokerError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(session = %session.redacted(), attempt = attempts, "Broker exchange");
            match self.exchange_once(session).await {
                Err(e) if e.is_transient() && self.retry.allows_another(attempts) => {
                    let delay = self.retry.backoff(attempts);
                    warn!(
                        session = %session.redacted(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker unavailable, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
