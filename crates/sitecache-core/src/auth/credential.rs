use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::utils::redact;

/// Opaque handle for an end-user session held by the broker.
///
/// Never persisted and never printed in full; `Debug` shows a short prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short, log-safe rendering of the handle
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionHandle({})", self.redacted())
    }
}

/// Store key derived from a session handle and provider.
///
/// The raw handle is a reusable secret, so only its SHA-256 digest is ever
/// written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(provider: &str, session: &SessionHandle) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update(b":");
        hasher.update(session.expose().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Rebuild a key from a file name; only lowercase 64-char hex is accepted.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == 64
            && raw
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short-lived bearer credential issued by the broker.
///
/// Immutable once issued: a newer credential replaces this one, it is never
/// edited in place.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
    expires_at: DateTime<Utc>,
    provider: String,
    principal: Option<String>,
}

impl Credential {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>, provider: impl Into<String>) -> Self {
        let secret = secret.into();
        let principal = principal_from_jwt(&secret);
        Self {
            secret,
            expires_at,
            provider: provider.into(),
            principal,
        }
    }

    /// The raw bearer secret, for the `Authorization` header only
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// User principal decoded from the token claims, when it is a JWT
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Usable only while `now < expires_at - margin`
    pub fn is_usable(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now < self.expires_at - margin
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &redact(&self.secret))
            .field("expires_at", &self.expires_at)
            .field("provider", &self.provider)
            .field("principal", &self.principal)
            .finish()
    }
}

#[derive(Deserialize)]
struct PrincipalClaims {
    upn: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
    unique_name: Option<String>,
}

/// Read the user principal out of a JWT payload without verifying it.
/// Claim order: `upn`, `preferred_username`, `email`, `unique_name`.
fn principal_from_jwt(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: PrincipalClaims = serde_json::from_slice(&bytes).ok()?;
    claims
        .upn
        .or(claims.preferred_username)
        .or(claims.email)
        .or(claims.unique_name)
        .filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with(claims: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(claims.as_bytes())
        )
    }

    #[test]
    fn test_cache_key_is_deterministic_and_hides_handle() {
        let handle = SessionHandle::new("session-secret-1234");
        let a = CacheKey::derive("microsoft_graph", &handle);
        let b = CacheKey::derive("microsoft_graph", &handle);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(!a.as_str().contains("session-secret"));
        assert_ne!(a, CacheKey::derive("other_provider", &handle));
        assert_eq!(CacheKey::parse(a.as_str()), Some(a));
    }

    #[test]
    fn test_cache_key_parse_rejects_garbage() {
        assert!(CacheKey::parse("store.key").is_none());
        assert!(CacheKey::parse(&"G".repeat(64)).is_none());
    }

    #[test]
    fn test_usable_respects_margin() {
        let now = Utc::now();
        let credential = Credential::new("tok", now + Duration::minutes(10), "microsoft_graph");
        assert!(credential.is_usable(now, Duration::minutes(5)));
        assert!(!credential.is_usable(now, Duration::minutes(10)));
        assert!(!credential.is_usable(now + Duration::minutes(6), Duration::minutes(5)));
        assert!(!credential.is_expired(now));
    }

    #[test]
    fn test_principal_claim_order() {
        let token = jwt_with(r#"{"preferred_username":"pref@contoso.com","email":"mail@contoso.com"}"#);
        let credential = Credential::new(token, Utc::now(), "microsoft_graph");
        assert_eq!(credential.principal(), Some("pref@contoso.com"));

        let token = jwt_with(r#"{"upn":"upn@contoso.com","email":"mail@contoso.com"}"#);
        assert_eq!(principal_from_jwt(&token).as_deref(), Some("upn@contoso.com"));
    }

    #[test]
    fn test_principal_absent_for_opaque_tokens() {
        assert_eq!(principal_from_jwt("not-a-jwt"), None);
        assert_eq!(principal_from_jwt("a.!!!.c"), None);
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let handle = SessionHandle::new("0123456789abcdef");
        assert_eq!(format!("{:?}", handle), "SessionHandle(01234567...)");
        let credential = Credential::new("supersecretbearer", Utc::now(), "p");
        assert!(!format!("{:?}", credential).contains("supersecretbearer"));
    }
}
